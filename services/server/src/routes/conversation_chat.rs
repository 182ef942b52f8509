use chat_protocol::{ChatRequest, ChatTransferPayload, ChatType, Message};
use chat_storage::setup;
use uuid::Uuid;

use crate::routes::HandlerError;
use crate::state::AppState;

/// `conversation.chat` (§6): derives `conversationId` when absent, ensures
/// the conversation/user-list setup (C9) for a first-contact direct chat,
/// and enqueues the transfer onto `chat-transfer` (C6).
pub async fn handle(state: AppState, conn_id: Uuid, msg: Message) -> Result<(), HandlerError> {
    let Some(sender) = state.registry.get_by_conn(conn_id).await.map(|c| c.uid.clone()) else {
        return Ok(());
    };

    let req: ChatRequest =
        serde_json::from_value(msg.data).map_err(|e| HandlerError::BadRequest(e.to_string()))?;

    let conversation_id = match req.conversation_id {
        Some(id) => id,
        None => match req.chat_type {
            ChatType::Direct => chat_ids::combine_id(&sender, &req.recv_id),
            ChatType::Group => req.recv_id.clone(),
        },
    };

    match req.chat_type {
        ChatType::Direct => {
            setup::setup_direct(&state.pool, &sender, &req.recv_id).await?;
        }
        ChatType::Group => {
            setup::ensure_group_sender(&state.pool, &conversation_id, &sender).await?;
        }
    }

    let send_time_ms = chrono::Utc::now().timestamp_millis();
    let client_msg_id = req
        .client_msg_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let payload = ChatTransferPayload {
        conversation_id,
        chat_type: req.chat_type,
        send_id: sender,
        recv_id: req.recv_id,
        send_time_ms,
        m_type: req.msg.m_type,
        content: req.msg.content,
        client_msg_id,
    };

    state
        .chat_transfer
        .publish(payload)
        .map_err(|e| HandlerError::BadRequest(e.to_string()))
}
