use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::catalog_store::CatalogStore;
use crate::review_queue::ReviewQueue;
use crate::search::QueryEngine;
use crate::server_store::ServerStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedCatalogStore = Arc<dyn CatalogStore>;
pub type GuardedServerStore = Arc<dyn ServerStore>;
pub type GuardedQueryEngine = Arc<QueryEngine>;
pub type GuardedReviewQueue = Arc<ReviewQueue>;
pub type OptionalSchedulerHandle = Option<SchedulerHandle>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub catalog_store: GuardedCatalogStore,
    pub server_store: GuardedServerStore,
    pub query_engine: GuardedQueryEngine,
    pub review_queue: GuardedReviewQueue,
    pub scheduler_handle: OptionalSchedulerHandle,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        catalog_store: GuardedCatalogStore,
        server_store: GuardedServerStore,
        query_engine: QueryEngine,
        scheduler_handle: OptionalSchedulerHandle,
    ) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            review_queue: Arc::new(ReviewQueue::new(catalog_store.clone())),
            catalog_store,
            server_store,
            query_engine: Arc::new(query_engine),
            scheduler_handle,
        }
    }
}

impl FromRef<ServerState> for GuardedCatalogStore {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog_store.clone()
    }
}

impl FromRef<ServerState> for GuardedServerStore {
    fn from_ref(input: &ServerState) -> Self {
        input.server_store.clone()
    }
}

impl FromRef<ServerState> for GuardedQueryEngine {
    fn from_ref(input: &ServerState) -> Self {
        input.query_engine.clone()
    }
}

impl FromRef<ServerState> for GuardedReviewQueue {
    fn from_ref(input: &ServerState) -> Self {
        input.review_queue.clone()
    }
}

impl FromRef<ServerState> for OptionalSchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
