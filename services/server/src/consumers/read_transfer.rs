// `read-transfer` consumer (C6): records a read for each message id, then
// re-injects a `push` (content_type = MarkRead) carrying the post-update read
// records so every other party can update its own view of what's been seen.
//
// Direct chats have exactly two parties, so there is nothing a bitmap buys
// over a single sentinel byte; group chats use the shared probabilistic
// bitmap (chat-bitmap) keyed by reader id.

use std::collections::HashMap;

use chat_bitmap::Bitmap;
use chat_protocol::{ChatType, Push, PushContentType, PushRecipients, ReadTransferPayload};
use chat_storage::{chat_log, group_members};

use crate::consumers::{wait_for_dispatcher, ConsumeError};
use crate::state::AppState;

/// Marks a direct chat message read for its two parties without bitmap
/// overhead: any non-empty buffer means "read".
const DIRECT_READ_SENTINEL: [u8; 1] = [0x01];

pub async fn run(state: AppState, sub: chat_queue::Subscriber<ReadTransferPayload>) {
    let dispatcher = wait_for_dispatcher(&state).await;
    chat_queue::run_consumer(sub, "read-transfer", |payload| {
        let state = state.clone();
        let dispatcher = dispatcher.clone();
        async move { process(&state, &dispatcher, payload).await }
    })
    .await;
}

async fn process(
    state: &AppState,
    dispatcher: &crate::dispatcher::DispatcherClient,
    payload: ReadTransferPayload,
) -> Result<(), ConsumeError> {
    let mut read_records = HashMap::with_capacity(payload.msg_ids.len());

    for msg_id in &payload.msg_ids {
        let Some(log) = chat_log::find_one(&state.pool, msg_id).await? else {
            // The message was never persisted (or was since purged); there's
            // nothing to mark, so skip it rather than fail the whole batch.
            continue;
        };

        let bytes = match payload.chat_type {
            ChatType::Direct => DIRECT_READ_SENTINEL.to_vec(),
            ChatType::Group => {
                let mut bitmap = Bitmap::load(&log.read_records);
                bitmap.set(&payload.send_id);
                bitmap.export()
            }
        };

        chat_log::update_mark_read(&state.pool, msg_id, &bytes).await?;
        read_records.insert(msg_id.clone(), base64_encode(&bytes));
    }

    if read_records.is_empty() {
        return Ok(());
    }

    let recv = match payload.chat_type {
        ChatType::Direct => PushRecipients::one(payload.recv_id.clone()),
        ChatType::Group => {
            let members = group_members::members(&state.pool, &payload.conversation_id).await?;
            let others: Vec<String> = members
                .into_iter()
                .map(|m| m.user_id)
                .filter(|uid| uid != &payload.send_id)
                .collect();
            PushRecipients::many(others)
        }
    };

    let push = Push {
        conversation_id: payload.conversation_id,
        chat_type: payload.chat_type,
        send_id: payload.send_id,
        recv,
        send_time: 0,
        msg_id: None,
        read_records: Some(read_records),
        content_type: PushContentType::MarkRead,
        m_type: 0,
        content: String::new(),
    };

    dispatcher.transfer(push).await?;
    Ok(())
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
