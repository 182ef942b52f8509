use chat_protocol::{Message, Push, PushRecipients};
use uuid::Uuid;

use crate::routes::HandlerError;
use crate::state::AppState;

/// `push` (§6): accepted only from the system identity; re-dispatches the
/// frame verbatim to the resolved recipient(s) -- a single direct delivery,
/// or one task-runner job per group recipient so a slow/offline member
/// can't stall the others.
pub async fn handle(state: AppState, conn_id: Uuid, msg: Message) -> Result<(), HandlerError> {
    let Some(caller) = state.registry.get_by_conn(conn_id).await.map(|c| c.uid.clone()) else {
        return Ok(());
    };
    if caller != state.system_uid {
        return Err(HandlerError::Forbidden(
            "push is only accepted from the system identity".to_owned(),
        ));
    }

    let push: Push =
        serde_json::from_value(msg.data.clone()).map_err(|e| HandlerError::BadRequest(e.to_string()))?;

    match push.recv {
        PushRecipients::One { recv_id } => {
            if let Some(conn) = state.registry.get_by_uid(&recv_id).await {
                // Offline recipients are dropped silently -- no retry, no error.
                let _ = conn.write(&msg).await;
            }
        }
        PushRecipients::Many { recv_ids } => {
            state.task_runner.fanout(state.registry.clone(), msg, recv_ids);
        }
    }

    Ok(())
}
