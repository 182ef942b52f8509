// Method-named frame dispatch (§4.4.5, §9 "Dynamic dispatch by method
// name"): a typed registry replaces runtime reflection -- each handler owns
// its own payload decoding.

mod conversation_chat;
mod conversation_mark_read;
mod push;
mod user_online;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chat_protocol::Message;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("malformed request body: {0}")]
    BadRequest(String),
    #[error("storage error: {0}")]
    Storage(#[from] chat_storage::StorageError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] crate::dispatcher::DispatchError),
    #[error("forbidden: {0}")]
    Forbidden(String),
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;
pub type Handler = Arc<dyn Fn(AppState, Uuid, Message) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct RouteRegistry {
    routes: HashMap<String, Handler>,
}

impl RouteRegistry {
    pub fn get(&self, method: &str) -> Option<&Handler> {
        self.routes.get(method)
    }

    fn insert<F, Fut>(&mut self, method: &str, handler: F)
    where
        F: Fn(AppState, Uuid, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.routes
            .insert(method.to_owned(), Arc::new(move |s, c, m| Box::pin(handler(s, c, m))));
    }
}

pub fn build_registry() -> RouteRegistry {
    let mut registry = RouteRegistry::default();
    registry.insert("user.online", user_online::handle);
    registry.insert("conversation.chat", conversation_chat::handle);
    registry.insert("conversation.markRead", conversation_mark_read::handle);
    registry.insert("push", push::handle);
    registry
}
