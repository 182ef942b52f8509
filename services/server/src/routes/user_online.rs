use chat_protocol::Message;
use uuid::Uuid;

use crate::routes::HandlerError;
use crate::state::AppState;

/// `user.online`: replies to the caller alone with the full snapshot of
/// currently bound uids.
pub async fn handle(state: AppState, conn_id: Uuid, _msg: Message) -> Result<(), HandlerError> {
    let Some(conn) = state.registry.get_by_conn(conn_id).await else {
        return Ok(());
    };
    let uids: Vec<String> = state
        .registry
        .get_users(&[])
        .await
        .into_iter()
        .flatten()
        .collect();

    let reply = Message::data_frame("user.online", "system", serde_json::json!({ "uids": uids }));
    conn.write(&reply)
        .await
        .map_err(|e| HandlerError::BadRequest(e.to_string()))
}
