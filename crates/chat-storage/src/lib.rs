// chat-storage: Postgres-backed persistence for chat logs, conversations,
// per-user conversation state, group membership and device tokens.

pub mod auth;
pub mod chat_log;
pub mod conversation;
pub mod group_members;
pub mod setup;
pub mod user_conversations;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("malformed conversation state for user {user_id}: {source}")]
    MalformedState {
        user_id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub async fn create_pool(database_url: &str) -> Result<PgPool, StorageError> {
    Ok(PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
