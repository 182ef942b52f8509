// Connection lifecycle (§4.4.1-4.4.2, §4.4.5, §4.4.7): accept, and the
// reader/writer/keep-alive tasks spawned for every bound connection. The ack
// scheduler lives in `ack.rs`; it is started here too, but only in an ack
// mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use chat_protocol::{FrameType, Message};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::connection::ack_active;
use crate::gateway::ConnHandle;
use crate::state::AppState;

/// Dispatch channel capacity: back-pressure on a slow handler blocks only
/// this connection's ack scheduler, never other connections (§5).
const DISPATCH_CHAN_CAPACITY: usize = 1;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let echoed_protocol = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);

    let ws = match &echoed_protocol {
        Some(p) => ws.protocols([p.clone()]),
        None => ws,
    };

    ws.on_upgrade(move |socket| accept(socket, state, headers))
}

async fn accept(mut socket: WebSocket, state: AppState, headers: HeaderMap) {
    let claims = match auth::authenticate(&state.pool, &headers).await {
        Ok(claims) => claims,
        Err(e) => {
            deny(&mut socket, &e.to_string()).await;
            return;
        }
    };

    let uid = claims.user_id;
    let conn_id = Uuid::new_v4();
    let (sink, stream) = socket.split();
    let (dispatch_tx, dispatch_rx) = mpsc::channel::<Message>(DISPATCH_CHAN_CAPACITY);
    let (done_tx, done_rx) = watch::channel(false);
    let handle = Arc::new(ConnHandle::new(
        conn_id,
        uid.clone(),
        sink,
        dispatch_tx,
        done_tx,
    ));

    if let Some(evicted) = state.registry.bind(&uid, handle.clone()).await {
        info!(uid = %uid, evicted_conn = %evicted.conn_id, "evicting prior connection for uid");
        let _ = evicted.done_tx.send(true);
        evicted.close_socket().await;
    }
    info!(uid = %uid, conn_id = %conn_id, "connection bound");

    tokio::spawn(reader_loop(
        handle.clone(),
        state.clone(),
        stream,
        done_rx.clone(),
    ));
    tokio::spawn(writer_loop(
        handle.clone(),
        state.clone(),
        dispatch_rx,
        done_rx.clone(),
    ));
    if state.config.ack_mode.is_ack_mode() {
        tokio::spawn(crate::ack::run(
            handle.clone(),
            state.config.clone(),
            done_rx.clone(),
        ));
    }
    tokio::spawn(keep_alive_loop(handle, state, done_rx));
}

async fn deny(socket: &mut WebSocket, reason: &str) {
    let frame = Message::data_frame(
        "auth",
        "system",
        serde_json::json!({ "denied": true, "reason": reason }),
    );
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = socket.send(WsFrame::Text(text.into())).await;
    }
    let _ = socket.close().await;
}

async fn reader_loop(
    conn: Arc<ConnHandle>,
    state: AppState,
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    mut done_rx: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = done_rx.changed() => break,
            frame = stream.next() => frame,
        };

        let Some(frame) = frame else {
            break;
        };

        let text = match frame {
            Ok(WsFrame::Text(text)) => text,
            Ok(WsFrame::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(conn_id = %conn.conn_id, error = %e, "read error, closing connection");
                break;
            }
        };

        *conn.idle_at.lock().await = None;

        let msg: Message = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                warn!(conn_id = %conn.conn_id, error = %e, "malformed frame, closing connection");
                break;
            }
        };

        let ack_active_for_msg = ack_active(state.config.ack_mode.is_ack_mode(), msg.frame_type);
        if ack_active_for_msg {
            let mut queue = conn.queue_state.lock().await;
            queue.append_msg_mq(msg);
        } else {
            let _ = conn.dispatch_tx.send(msg).await;
        }
    }

    state.registry.close(conn.conn_id).await;
}

async fn writer_loop(
    conn: Arc<ConnHandle>,
    state: AppState,
    mut dispatch_rx: mpsc::Receiver<Message>,
    mut done_rx: watch::Receiver<bool>,
) {
    loop {
        let msg = tokio::select! {
            _ = done_rx.changed() => {
                if *done_rx.borrow() { return; }
                continue;
            }
            msg = dispatch_rx.recv() => msg,
        };
        let Some(msg) = msg else { return };

        match msg.frame_type {
            FrameType::Ping => {
                let _ = conn.write(&Message::ping()).await;
            }
            // NoAck is a Data-equivalent frame that skipped ack tracking
            // (either because the server runs NoAck mode, or the frame was
            // tagged NoAck by its sender, e.g. a dispatcher-injected push) --
            // it still routes by `method` like any other Data frame.
            FrameType::Data | FrameType::NoAck => {
                if let Some(method) = msg.method.clone() {
                    if let Some(handler) = state.routes.get(&method) {
                        if let Err(e) = handler(state.clone(), conn.conn_id, msg.clone()).await {
                            warn!(conn_id = %conn.conn_id, method = %method, error = %e, "handler error");
                            let err_frame = Message::err(method, &e.to_string());
                            let _ = conn.write(&err_frame).await;
                        }
                    } else {
                        let err_frame = Message::err(method.clone(), "no route registered for method");
                        let _ = conn.write(&err_frame).await;
                    }
                }
            }
            FrameType::Ack | FrameType::Err => {}
        }

        let ack_active_for_msg = ack_active(state.config.ack_mode.is_ack_mode(), msg.frame_type);
        if ack_active_for_msg {
            if let Some(id) = &msg.id {
                conn.queue_state.lock().await.forget(id);
            }
        }
    }
}

const KEEP_ALIVE_POLL: Duration = Duration::from_secs(1);

async fn keep_alive_loop(conn: Arc<ConnHandle>, state: AppState, mut done_rx: watch::Receiver<bool>) {
    let mut remaining = state.config.max_idle;
    loop {
        tokio::select! {
            _ = done_rx.changed() => { if *done_rx.borrow() { return; } }
            _ = tokio::time::sleep(remaining.min(KEEP_ALIVE_POLL)) => {}
        }
        if *done_rx.borrow() {
            return;
        }

        let idle_at = *conn.idle_at.lock().await;
        match idle_at {
            None => {
                // An inbound read happened since the last write; reset the
                // full window.
                remaining = state.config.max_idle;
            }
            Some(last_write) => {
                let elapsed = Instant::now().saturating_duration_since(last_write);
                if elapsed >= state.config.max_idle {
                    state.registry.close(conn.conn_id).await;
                    return;
                }
                remaining = state.config.max_idle - elapsed;
            }
        }
    }
}
