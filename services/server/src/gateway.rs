// Server-wide connection registry and fan-out API (§4.4, §4.4.6).
//
// Two maps -- `conn_to_uid` and `uid_to_conn` -- live under one read-write
// mutex, matching the spec's invariant that for any bound connection `c`,
// `conn_to_uid[c] == u` iff `uid_to_conn[u] == c`. Per-connection ack state
// (`read_queue`/`read_index`) and idle tracking live in `ConnHandle`, each
// behind its own mutex -- never nested inside the registry lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Message as WsFrame;
use chat_protocol::Message;
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::connection::QueueState;

pub type Sink = SplitSink<axum::extract::ws::WebSocket, WsFrame>;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("websocket send failed: {0}")]
    Ws(#[from] axum::Error),
    #[error("failed to encode frame as JSON: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-connection handle shared by the reader, writer, ack scheduler and
/// keep-alive tasks, plus the registry's fan-out API.
pub struct ConnHandle {
    pub conn_id: Uuid,
    pub uid: String,
    sink: Mutex<Sink>,
    pub queue_state: Mutex<QueueState>,
    pub idle_at: Mutex<Option<Instant>>,
    pub dispatch_tx: mpsc::Sender<Message>,
    pub done_tx: watch::Sender<bool>,
}

impl ConnHandle {
    pub fn new(
        conn_id: Uuid,
        uid: String,
        sink: Sink,
        dispatch_tx: mpsc::Sender<Message>,
        done_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            conn_id,
            uid,
            sink: Mutex::new(sink),
            queue_state: Mutex::new(QueueState::new()),
            idle_at: Mutex::new(None),
            dispatch_tx,
            done_tx,
        }
    }

    pub fn is_done(&self) -> bool {
        *self.done_tx.subscribe().borrow()
    }

    /// Writes one frame to this connection's socket and stamps `idle_at`,
    /// per §4.4.7's "write_message sets idle_at" contract.
    pub async fn write(&self, msg: &Message) -> Result<(), SendError> {
        let text = serde_json::to_string(msg)?;
        let mut sink = self.sink.lock().await;
        sink.send(WsFrame::Text(text.into())).await?;
        drop(sink);
        *self.idle_at.lock().await = Some(Instant::now());
        Ok(())
    }

    pub async fn close_socket(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}

#[derive(Default)]
struct RegistryInner {
    conn_to_uid: HashMap<Uuid, String>,
    uid_to_conn: HashMap<String, Uuid>,
    conns: HashMap<Uuid, Arc<ConnHandle>>,
}

/// The gateway's connection registry and fan-out API (C4.4.6).
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Binds `uid` to `conn`, evicting any prior connection for that uid.
    /// Returns the handle of the connection that was evicted, if any, so
    /// the caller can signal it via `done` outside the registry lock.
    pub async fn bind(&self, uid: &str, handle: Arc<ConnHandle>) -> Option<Arc<ConnHandle>> {
        let mut inner = self.inner.write().await;
        let evicted = inner.uid_to_conn.get(uid).copied().and_then(|old_conn| {
            inner.conn_to_uid.remove(&old_conn);
            inner.conns.remove(&old_conn)
        });

        inner.conn_to_uid.insert(handle.conn_id, uid.to_owned());
        inner.uid_to_conn.insert(uid.to_owned(), handle.conn_id);
        inner.conns.insert(handle.conn_id, handle);
        evicted
    }

    /// §4.4.8: idempotent close. Returns `false` if the connection was
    /// already removed (a concurrent close beat us to it).
    pub async fn close(&self, conn_id: Uuid) -> bool {
        let handle = {
            let mut inner = self.inner.write().await;
            let Some(uid) = inner.conn_to_uid.remove(&conn_id) else {
                return false;
            };
            // Only drop the uid->conn mapping if it still points at us --
            // a newer connection for the same uid may have already
            // overwritten it via `bind`.
            if inner.uid_to_conn.get(&uid) == Some(&conn_id) {
                inner.uid_to_conn.remove(&uid);
            }
            inner.conns.remove(&conn_id)
        };
        if let Some(handle) = handle {
            let _ = handle.done_tx.send(true);
            handle.close_socket().await;
        }
        true
    }

    pub async fn get_by_conn(&self, conn_id: Uuid) -> Option<Arc<ConnHandle>> {
        self.inner.read().await.conns.get(&conn_id).cloned()
    }

    pub async fn get_by_uid(&self, uid: &str) -> Option<Arc<ConnHandle>> {
        let inner = self.inner.read().await;
        let conn_id = inner.uid_to_conn.get(uid)?;
        inner.conns.get(conn_id).cloned()
    }

    /// `get_conns`: resolves uids in input order; a missing uid yields a
    /// `None` slot rather than shortening the result.
    pub async fn get_conns(&self, uids: &[String]) -> Vec<Option<Arc<ConnHandle>>> {
        let inner = self.inner.read().await;
        uids.iter()
            .map(|uid| {
                inner
                    .uid_to_conn
                    .get(uid)
                    .and_then(|c| inner.conns.get(c))
                    .cloned()
            })
            .collect()
    }

    /// `get_users`: no connections given yields a snapshot of every bound
    /// uid; otherwise the uid bound to each given connection, in order
    /// (`None` for an unbound connection id).
    pub async fn get_users(&self, conns: &[Uuid]) -> Vec<Option<String>> {
        let inner = self.inner.read().await;
        if conns.is_empty() {
            return inner.uid_to_conn.keys().cloned().map(Some).collect();
        }
        conns
            .iter()
            .map(|c| inner.conn_to_uid.get(c).cloned())
            .collect()
    }

    /// Writes `msg` to every given handle, skipping unresolved (`None`)
    /// slots. Stops and returns the first write error; earlier writes in
    /// the batch are not rolled back (partial delivery is accepted).
    pub async fn send(
        &self,
        msg: &Message,
        targets: &[Option<Arc<ConnHandle>>],
    ) -> Result<(), SendError> {
        for target in targets {
            let Some(handle) = target else { continue };
            handle.write(msg).await?;
        }
        Ok(())
    }

    pub async fn send_by_user_ids(&self, msg: &Message, uids: &[String]) -> Result<(), SendError> {
        let targets = self.get_conns(uids).await;
        self.send(msg, &targets).await
    }
}

/// Bounded-concurrency task-runner used for group fan-out: each recipient's
/// delivery is an independent task, and a slow or failing recipient cannot
/// stall its siblings (§4.4.6, §5 back-pressure).
#[derive(Clone)]
pub struct TaskRunner {
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl TaskRunner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(tokio::sync::Semaphore::new(concurrency.max(1))),
        }
    }

    /// Spawns one task per recipient; admission blocks (via the semaphore)
    /// once `concurrency` tasks are in flight. Errors are logged and never
    /// propagated -- a failed delivery to one recipient never affects
    /// siblings.
    pub fn fanout(&self, registry: Registry, msg: Message, uids: Vec<String>) {
        for uid in uids {
            let registry = registry.clone();
            let msg = msg.clone();
            let semaphore = self.semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                if let Err(e) = registry.send_by_user_ids(&msg, std::slice::from_ref(&uid)).await
                {
                    warn!(recipient = %uid, error = %e, "group fan-out delivery failed");
                }
            });
        }
    }
}
