// `chat-transfer` consumer (C6): assigns a durable message id, persists the
// chat log and rolls the conversation's summary forward, then re-injects a
// `push` frame through the dispatcher so the gateway fans it out to the
// actual recipients.

use chat_protocol::{ChatTransferPayload, ChatType, Push, PushContentType, PushRecipients};
use chat_storage::chat_log::NewChatLog;
use chat_storage::{chat_log, conversation, group_members};

use crate::consumers::{wait_for_dispatcher, ConsumeError};
use crate::state::AppState;

pub async fn run(state: AppState, sub: chat_queue::Subscriber<ChatTransferPayload>) {
    let dispatcher = wait_for_dispatcher(&state).await;
    chat_queue::run_consumer(sub, "chat-transfer", |payload| {
        let state = state.clone();
        let dispatcher = dispatcher.clone();
        async move { process(&state, &dispatcher, payload).await }
    })
    .await;
}

async fn process(
    state: &AppState,
    dispatcher: &crate::dispatcher::DispatcherClient,
    payload: ChatTransferPayload,
) -> Result<(), ConsumeError> {
    let msg_id = state.id_allocator.next_id().await?;

    let outcome = chat_log::insert(
        &state.pool,
        NewChatLog {
            msg_id,
            conversation_id: payload.conversation_id.clone(),
            chat_type: payload.chat_type,
            sender_id: payload.send_id.clone(),
            recipient_id: payload.recv_id.clone(),
            msg_type: payload.m_type as i32,
            content: payload.content.clone(),
            send_time: payload.send_time_ms,
            client_msg_id: payload.client_msg_id,
        },
    )
    .await?;
    let log = outcome.log;

    if outcome.was_new {
        // Only a freshly-inserted row advances the conversation's total --
        // a redelivered (conversation_id, client_msg_id) must not double
        // count, even though we still re-push so the recipient's client
        // can resolve its own dedupe against `msgId`.
        conversation::update_msg(&state.pool, &log).await?;
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
        send_time: payload.send_time_ms,
        msg_id: Some(log.msg_id),
        read_records: None,
        content_type: PushContentType::ChatMsg,
        m_type: payload.m_type,
        content: payload.content,
    };

    // The chat log is already persisted (idempotent insert), so requeueing
    // a dispatch failure only risks a duplicate push, never a duplicate
    // message.
    dispatcher.transfer(push).await?;

    Ok(())
}
