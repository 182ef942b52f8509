use chat_bitmap::Bitmap;
use chat_protocol::ChatType;
use sqlx::{PgPool, Row};

use crate::StorageError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatLogRow {
    pub msg_id: String,
    pub conversation_id: String,
    pub chat_type: ChatType,
    pub sender_id: String,
    pub recipient_id: String,
    pub msg_type: i32,
    pub content: String,
    pub send_time: i64,
    pub read_records: Vec<u8>,
}

/// Result of an idempotent insert attempt: whether the row was freshly
/// created, or the conflict branch returned an already-persisted row from
/// an earlier delivery of the same `(conversation_id, client_msg_id)`.
pub struct InsertOutcome {
    pub log: ChatLogRow,
    pub was_new: bool,
}

pub struct NewChatLog {
    pub msg_id: String,
    pub conversation_id: String,
    pub chat_type: ChatType,
    pub sender_id: String,
    pub recipient_id: String,
    pub msg_type: i32,
    pub content: String,
    pub send_time: i64,
    pub client_msg_id: String,
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

fn row_to_chat_log(r: sqlx::postgres::PgRow) -> ChatLogRow {
    ChatLogRow {
        msg_id: r.get("msg_id"),
        conversation_id: r.get("conversation_id"),
        chat_type: parse_chat_type(r.get::<String, _>("chat_type").as_str()),
        sender_id: r.get("sender_id"),
        recipient_id: r.get("recipient_id"),
        msg_type: r.get("msg_type"),
        content: r.get("content"),
        send_time: r.get("send_time"),
        read_records: r.get("read_records"),
    }
}

/// Inserts a chat log with the sender's bit pre-set in `read_records`.
///
/// Idempotent on `(conversation_id, client_msg_id)`: a redelivered insert
/// returns the row that already exists instead of erroring or duplicating,
/// and `was_new` tells the caller whether this attempt actually created the
/// row -- callers must skip `conversation::update_msg`'s `total` increment
/// when it didn't, or a requeued delivery would double-count.
pub async fn insert(pool: &PgPool, log: NewChatLog) -> Result<InsertOutcome, StorageError> {
    let mut bitmap = Bitmap::new(0);
    bitmap.set(&log.sender_id);

    let row = sqlx::query(
        r#"INSERT INTO chat_logs
               (msg_id, conversation_id, chat_type, sender_id, recipient_id,
                msg_type, content, send_time, read_records, client_msg_id)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
           ON CONFLICT (conversation_id, client_msg_id) DO UPDATE
               SET conversation_id = chat_logs.conversation_id
           RETURNING msg_id, conversation_id, chat_type, sender_id, recipient_id,
                     msg_type, content, send_time, read_records, (xmax = 0) AS was_new"#,
    )
    .bind(&log.msg_id)
    .bind(&log.conversation_id)
    .bind(chat_type_str(log.chat_type))
    .bind(&log.sender_id)
    .bind(&log.recipient_id)
    .bind(log.msg_type)
    .bind(&log.content)
    .bind(log.send_time)
    .bind(bitmap.export())
    .bind(&log.client_msg_id)
    .fetch_one(pool)
    .await?;

    let was_new: bool = row.get("was_new");
    Ok(InsertOutcome {
        log: row_to_chat_log(row),
        was_new,
    })
}

pub async fn find_one(pool: &PgPool, msg_id: &str) -> Result<Option<ChatLogRow>, StorageError> {
    let row = sqlx::query(
        r#"SELECT msg_id, conversation_id, chat_type, sender_id, recipient_id,
                  msg_type, content, send_time, read_records
           FROM chat_logs WHERE msg_id = $1"#,
    )
    .bind(msg_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_to_chat_log))
}

pub async fn list_by_msg_ids(
    pool: &PgPool,
    msg_ids: &[String],
) -> Result<Vec<ChatLogRow>, StorageError> {
    let rows = sqlx::query(
        r#"SELECT msg_id, conversation_id, chat_type, sender_id, recipient_id,
                  msg_type, content, send_time, read_records
           FROM chat_logs WHERE msg_id = ANY($1)"#,
    )
    .bind(msg_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_chat_log).collect())
}

/// Time-range pagination, ascending `send_time`, capped at `count`.
pub async fn list_by_send_time(
    pool: &PgPool,
    conversation_id: &str,
    start_ms: i64,
    end_ms: i64,
    count: i64,
) -> Result<Vec<ChatLogRow>, StorageError> {
    let rows = sqlx::query(
        r#"SELECT msg_id, conversation_id, chat_type, sender_id, recipient_id,
                  msg_type, content, send_time, read_records
           FROM chat_logs
           WHERE conversation_id = $1 AND send_time >= $2 AND send_time <= $3
           ORDER BY send_time ASC
           LIMIT $4"#,
    )
    .bind(conversation_id)
    .bind(start_ms)
    .bind(end_ms)
    .bind(count)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_chat_log).collect())
}

pub async fn update_mark_read(
    pool: &PgPool,
    msg_id: &str,
    read_records: &[u8],
) -> Result<(), StorageError> {
    sqlx::query("UPDATE chat_logs SET read_records = $1 WHERE msg_id = $2")
        .bind(read_records)
        .bind(msg_id)
        .execute(pool)
        .await?;
    Ok(())
}
