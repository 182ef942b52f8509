use std::collections::HashMap;

use chat_protocol::UserConversationState;
use sqlx::{PgPool, Row};

use crate::StorageError;

/// One document per user: the full `conversation_id -> state` map, read and
/// written as a whole (never patched field-by-field).
pub async fn find_by_user_id(
    pool: &PgPool,
    user_id: &str,
) -> Result<HashMap<String, UserConversationState>, StorageError> {
    let row = sqlx::query("SELECT conversations FROM user_conversations WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(HashMap::new());
    };
    let value: serde_json::Value = row.get("conversations");
    serde_json::from_value(value).map_err(|source| StorageError::MalformedState {
        user_id: user_id.to_owned(),
        source,
    })
}

pub async fn update(
    pool: &PgPool,
    user_id: &str,
    conversations: &HashMap<String, UserConversationState>,
) -> Result<(), StorageError> {
    let value = serde_json::to_value(conversations).expect("UserConversationState is always serializable");
    sqlx::query(
        r#"INSERT INTO user_conversations (user_id, conversations)
           VALUES ($1, $2)
           ON CONFLICT (user_id) DO UPDATE SET conversations = EXCLUDED.conversations"#,
    )
    .bind(user_id)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}
