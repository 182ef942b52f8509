use sqlx::PgPool;

pub async fn create_pool(database_url: &str) -> PgPool {
    chat_storage::create_pool(database_url)
        .await
        .expect("failed to connect to Postgres")
}

pub async fn run_migrations(pool: &PgPool) {
    chat_storage::run_migrations(pool)
        .await
        .expect("failed to run database migrations")
}
