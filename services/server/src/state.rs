use std::sync::Arc;

use chat_protocol::{ChatTransferPayload, ReadTransferPayload};
use sqlx::PgPool;
use tokio::sync::OnceCell;

use crate::config::GatewayConfig;
use crate::dispatcher::DispatcherClient;
use crate::gateway::{Registry, TaskRunner};
use crate::routes::RouteRegistry;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: GatewayConfig,
    pub registry: Registry,
    pub task_runner: TaskRunner,
    pub routes: Arc<RouteRegistry>,
    pub id_allocator: Arc<chat_ids::IdAllocator>,
    pub chat_transfer: chat_queue::Topic<ChatTransferPayload>,
    pub read_transfer: chat_queue::Topic<ReadTransferPayload>,
    /// Set once the dispatcher client has dialed the gateway at boot; the
    /// `push` handler and the transfer consumers share this single outbound
    /// connection (§4.5).
    pub dispatcher: Arc<OnceCell<Arc<DispatcherClient>>>,
    /// The well-known uid the transfer pipeline authenticates as; frames
    /// claiming method `push` are only honored from this identity.
    pub system_uid: String,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: GatewayConfig,
        system_uid: String,
        chat_transfer: chat_queue::Topic<ChatTransferPayload>,
        read_transfer: chat_queue::Topic<ReadTransferPayload>,
    ) -> Self {
        let fanout_concurrency = config.fanout_concurrency;
        Self {
            id_allocator: Arc::new(chat_ids::IdAllocator::new(pool.clone(), "uid")),
            pool,
            registry: Registry::new(),
            task_runner: TaskRunner::new(fanout_concurrency),
            routes: Arc::new(crate::routes::build_registry()),
            chat_transfer,
            read_transfer,
            dispatcher: Arc::new(OnceCell::new()),
            system_uid,
            config,
        }
    }
}
