use chat_protocol::ChatType;
use sqlx::{PgPool, Row};

use crate::chat_log::ChatLogRow;
use crate::StorageError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConversationRow {
    pub conversation_id: String,
    pub chat_type: ChatType,
    pub total: i64,
    pub last_msg_id: Option<String>,
    pub last_msg_type: Option<i32>,
    pub last_content: Option<String>,
    pub last_sender_id: Option<String>,
    pub last_send_time: Option<i64>,
}

fn chat_type_str(t: ChatType) -> &'static str {
    match t {
        ChatType::Direct => "direct",
        ChatType::Group => "group",
    }
}

fn parse_chat_type(s: &str) -> ChatType {
    match s {
        "group" => ChatType::Group,
        _ => ChatType::Direct,
    }
}

fn row_to_conversation(r: sqlx::postgres::PgRow) -> ConversationRow {
    ConversationRow {
        conversation_id: r.get("conversation_id"),
        chat_type: parse_chat_type(r.get::<String, _>("chat_type").as_str()),
        total: r.get("total"),
        last_msg_id: r.get("last_msg_id"),
        last_msg_type: r.get("last_msg_type"),
        last_content: r.get("last_content"),
        last_sender_id: r.get("last_sender_id"),
        last_send_time: r.get("last_send_time"),
    }
}

pub async fn find_one(
    pool: &PgPool,
    conversation_id: &str,
) -> Result<Option<ConversationRow>, StorageError> {
    let row = sqlx::query(
        r#"SELECT conversation_id, chat_type, total, last_msg_id, last_msg_type,
                  last_content, last_sender_id, last_send_time
           FROM conversations WHERE conversation_id = $1"#,
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_to_conversation))
}

/// Inserts a conversation if it doesn't already exist. A no-op on conflict,
/// matching the "already exists -> do nothing" setup semantics.
pub async fn insert_if_absent(
    pool: &PgPool,
    conversation_id: &str,
    chat_type: ChatType,
) -> Result<(), StorageError> {
    sqlx::query(
        r#"INSERT INTO conversations (conversation_id, chat_type)
           VALUES ($1, $2)
           ON CONFLICT (conversation_id) DO NOTHING"#,
    )
    .bind(conversation_id)
    .bind(chat_type_str(chat_type))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_by_ids(
    pool: &PgPool,
    conversation_ids: &[String],
) -> Result<Vec<ConversationRow>, StorageError> {
    let rows = sqlx::query(
        r#"SELECT conversation_id, chat_type, total, last_msg_id, last_msg_type,
                  last_content, last_sender_id, last_send_time
           FROM conversations WHERE conversation_id = ANY($1)"#,
    )
    .bind(conversation_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_conversation).collect())
}

/// Upserts the conversation's latest-message summary and atomically
/// increments `total` by one. Returns the post-increment total.
pub async fn update_msg(pool: &PgPool, log: &ChatLogRow) -> Result<i64, StorageError> {
    let row = sqlx::query(
        r#"UPDATE conversations
           SET total = total + 1,
               last_msg_id = $2,
               last_msg_type = $3,
               last_content = $4,
               last_sender_id = $5,
               last_send_time = $6
           WHERE conversation_id = $1
           RETURNING total"#,
    )
    .bind(&log.conversation_id)
    .bind(&log.msg_id)
    .bind(log.msg_type)
    .bind(&log.content)
    .bind(&log.sender_id)
    .bind(log.send_time)
    .fetch_one(pool)
    .await?;
    Ok(row.get::<i64, _>("total"))
}
