use chat_protocol::{MarkReadRequest, Message, ReadTransferPayload};
use uuid::Uuid;

use crate::routes::HandlerError;
use crate::state::AppState;

/// `conversation.markRead` (§6): enqueues the read onto `read-transfer`
/// (C6), which updates per-message bitmaps and fans out read receipts.
pub async fn handle(state: AppState, conn_id: Uuid, msg: Message) -> Result<(), HandlerError> {
    let Some(sender) = state.registry.get_by_conn(conn_id).await.map(|c| c.uid.clone()) else {
        return Ok(());
    };

    let req: MarkReadRequest =
        serde_json::from_value(msg.data).map_err(|e| HandlerError::BadRequest(e.to_string()))?;

    let payload = ReadTransferPayload {
        conversation_id: req.conversation_id,
        chat_type: req.chat_type,
        send_id: sender,
        recv_id: req.recv_id,
        msg_ids: req.msg_ids,
    };

    state
        .read_transfer
        .publish(payload)
        .map_err(|e| HandlerError::BadRequest(e.to_string()))
}
