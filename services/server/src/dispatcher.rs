// Dispatcher client (C5, §4.5): the transfer pipeline's long-lived outbound
// WebSocket back into the gateway, authenticated as the system identity.
// Used to re-inject `push` frames so fan-out runs through the gateway's own
// connection registry instead of duplicating it in the consumer.

use chat_protocol::{Message, Push};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message as TungsteniteMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, TungsteniteMessage>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dial failed: {0}")]
    Dial(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct DispatcherClient {
    url: String,
    system_token: String,
    sink: Mutex<WsSink>,
}

impl DispatcherClient {
    pub async fn connect(url: &str, system_token: &str) -> Result<Self, DispatchError> {
        let sink = dial_and_spawn_reader(url, system_token).await?;
        Ok(Self {
            url: url.to_owned(),
            system_token: system_token.to_owned(),
            sink: Mutex::new(sink),
        })
    }

    /// Sends a push frame, redialing exactly once on a write failure
    /// (§4.5's "loss tolerance"). If the retry also fails, the push is
    /// reported as an error so the queue consumer requeues it.
    pub async fn transfer(&self, push: Push) -> Result<(), DispatchError> {
        // Tagged NoAck: a system-injected push carries no client-assigned
        // `id`, so it must skip the gateway's ack-tracking path entirely
        // rather than be silently dropped by `append_msg_mq` for lacking one.
        let mut frame = Message::data_frame("push", "system", serde_json::to_value(push)?);
        frame.frame_type = chat_protocol::FrameType::NoAck;
        let text = serde_json::to_string(&frame)?;

        let mut sink = self.sink.lock().await;
        if sink
            .send(TungsteniteMessage::Text(text.clone().into()))
            .await
            .is_ok()
        {
            return Ok(());
        }

        warn!("dispatcher write failed, redialing once");
        let mut fresh = dial_and_spawn_reader(&self.url, &self.system_token).await?;
        fresh.send(TungsteniteMessage::Text(text.into())).await?;
        *sink = fresh;
        Ok(())
    }
}

async fn dial_and_spawn_reader(
    url: &str,
    system_token: &str,
) -> Result<WsSink, tokio_tungstenite::tungstenite::Error> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::http::HeaderValue;

    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "authorization",
        HeaderValue::from_str(&format!("Bearer {system_token}"))
            .expect("token must be a valid header value"),
    );
    let (stream, _response) = connect_async(request).await?;
    let (sink, mut source) = stream.split();

    // Nothing meaningful to do with inbound traffic (the gateway never
    // solicits acks from the system identity's own pushes under NoAck/
    // OnlyAck, and under RigorAck the reader below just observes them) --
    // drain it so the socket's read buffer never backs up.
    tokio::spawn(async move {
        while let Some(msg) = source.next().await {
            match msg {
                Ok(_) => debug!("dispatcher drained an inbound frame"),
                Err(e) => {
                    warn!(error = %e, "dispatcher inbound stream closed");
                    break;
                }
            }
        }
    });

    Ok(sink)
}
