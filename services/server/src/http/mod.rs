// C7: the plain-HTTP conversation read API that sits alongside the gateway's
// WebSocket surface -- a client fetches/patches its unread state here
// instead of over the wire protocol, since it's a one-shot request/response
// rather than something the connection's ack machinery needs to track.

pub mod conversations;
mod response;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("{0}")]
    BadRequest(String),
    #[error("storage error: {0}")]
    Storage(#[from] chat_storage::StorageError),
    #[error("authentication failed: {0}")]
    Auth(#[from] chat_storage::auth::AuthError),
}
