pub mod ack;
pub mod auth;
pub mod config;
pub mod connection;
pub mod consumers;
pub mod db;
pub mod dispatcher;
pub mod gateway;
pub mod http;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route(
            "/api/v1/conversations",
            get(http::conversations::get_conversations).put(http::conversations::put_conversations),
        )
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
