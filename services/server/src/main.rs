use std::sync::Arc;

use chat_gateway::config::GatewayConfig;
use chat_gateway::dispatcher::DispatcherClient;
use chat_gateway::state::AppState;
use chat_gateway::{consumers, db};
use chat_storage::auth::ensure_system_identity;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config = GatewayConfig::from_env();

    info!("connecting to database...");
    let pool = db::create_pool(&config.database_url).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let system_token = ensure_system_identity(&pool)
        .await
        .expect("failed to mint system identity token");

    let (chat_transfer_topic, chat_transfer_sub) = chat_queue::topic();
    let (read_transfer_topic, read_transfer_sub) = chat_queue::topic();

    let bind_addr = config.bind_addr.clone();
    let self_ws_url = config.self_ws_url.clone();

    let state = AppState::new(
        pool,
        config,
        chat_storage::auth::SYSTEM_USER_ID.to_owned(),
        chat_transfer_topic,
        read_transfer_topic,
    );

    consumers::spawn(state.clone(), chat_transfer_sub, read_transfer_sub);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "gateway listening");

    // The dispatcher dials this same listener as the system identity, so it
    // can only connect once the socket is actually accepting -- spawn it
    // after `bind` rather than blocking startup on the round trip.
    tokio::spawn(connect_dispatcher(state.clone(), self_ws_url, system_token));

    axum::serve(listener, chat_gateway::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("gateway shut down gracefully");
}

async fn connect_dispatcher(state: AppState, url: String, system_token: String) {
    match DispatcherClient::connect(&url, &system_token).await {
        Ok(client) => {
            if state.dispatcher.set(Arc::new(client)).is_err() {
                tracing::warn!("dispatcher was already connected");
            } else {
                info!(url = %url, "dispatcher connected as system identity");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to connect dispatcher, transfer pipeline will stall");
        }
    }
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
