// C6 transfer-pipeline consumers: drain the `chat-transfer`/`read-transfer`
// queue topics published by the `conversation.chat`/`conversation.markRead`
// routes, persist, and re-inject the result as a `push` frame through the
// dispatcher so fan-out goes through the gateway's own connection registry.

pub mod chat_transfer;
pub mod read_transfer;

use std::sync::Arc;
use std::time::Duration;

use chat_protocol::{ChatTransferPayload, ReadTransferPayload};

use crate::dispatcher::DispatcherClient;
use crate::state::AppState;

const DISPATCHER_WAIT_POLL: Duration = Duration::from_millis(50);

/// Spins until the dispatcher client has finished dialing in at boot. The
/// consumer loops are spawned before the dispatcher connects (it dials the
/// gateway's own listener, which must already be bound), so this is a short,
/// bounded wait rather than a real retry loop.
pub(crate) async fn wait_for_dispatcher(state: &AppState) -> Arc<DispatcherClient> {
    loop {
        if let Some(client) = state.dispatcher.get() {
            return client.clone();
        }
        tokio::time::sleep(DISPATCHER_WAIT_POLL).await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("storage: {0}")]
    Storage(#[from] chat_storage::StorageError),
    #[error("id allocation: {0}")]
    Id(#[from] chat_ids::IdError),
    #[error("dispatch: {0}")]
    Dispatch(#[from] crate::dispatcher::DispatchError),
}

pub fn spawn(
    state: AppState,
    chat_transfer_sub: chat_queue::Subscriber<ChatTransferPayload>,
    read_transfer_sub: chat_queue::Subscriber<ReadTransferPayload>,
) {
    tokio::spawn(chat_transfer::run(state.clone(), chat_transfer_sub));
    tokio::spawn(read_transfer::run(state, read_transfer_sub));
}
