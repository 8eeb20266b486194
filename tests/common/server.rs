//! Test server lifecycle management
//!
//! Each test gets an isolated server with its own databases, seeded by one
//! refresh cycle over the fixture sources before the server starts.

use super::constants::*;
use super::fixtures::{FixtureMetadata, FixtureRatings};
use reelfilter_catalog_server::background_jobs::jobs::RefreshCatalogJob;
use reelfilter_catalog_server::background_jobs::{create_scheduler, JobContext};
use reelfilter_catalog_server::config::{MatchingSettings, RefreshSettings, SearchSettings};
use reelfilter_catalog_server::search::QueryEngine;
use reelfilter_catalog_server::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use reelfilter_catalog_server::{
    CatalogStore, RefreshOrchestrator, ServerStore, SqliteCatalogStore, SqliteServerStore,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with isolated databases
///
/// When dropped, the server and scheduler shut down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Catalog store for direct database access in tests
    pub catalog_store: Arc<dyn CatalogStore>,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the databases cannot be created, the seeding cycle fails or
    /// the server doesn't become ready within timeout.
    pub async fn spawn() -> Self {
        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");

        let catalog_store: Arc<dyn CatalogStore> = Arc::new(
            SqliteCatalogStore::new(temp_db_dir.path().join("catalog.db"), 2)
                .expect("Failed to open catalog store"),
        );
        let server_store: Arc<dyn ServerStore> = Arc::new(
            SqliteServerStore::new(temp_db_dir.path().join("server.db"))
                .expect("Failed to open server store"),
        );

        let matching = MatchingSettings::default();
        let refresh = RefreshSettings {
            max_retries: 0,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            ..Default::default()
        };
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            Arc::new(FixtureRatings::new()),
            Arc::new(FixtureMetadata::new()),
            catalog_store.clone(),
            server_store.clone(),
            &matching,
            &refresh,
        ));

        let seeding = orchestrator.clone();
        tokio::task::spawn_blocking(move || seeding.run_cycle(&CancellationToken::new(), "seed"))
            .await
            .expect("Seeding task panicked")
            .expect("Seeding cycle failed");

        let shutdown = CancellationToken::new();
        let job_context = JobContext::new(
            shutdown.child_token(),
            catalog_store.clone(),
            server_store.clone(),
        );
        let (mut scheduler, scheduler_handle) =
            create_scheduler(server_store.clone(), shutdown.clone(), job_context);
        scheduler
            .register_job(Arc::new(RefreshCatalogJob::new(orchestrator, &refresh)))
            .await;
        tokio::spawn(async move {
            scheduler.run().await;
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            metrics_port: 0,
        };
        let query_engine = QueryEngine::new(
            catalog_store.clone(),
            SearchSettings::default(),
            matching.auto_accept_threshold,
        );
        let state = ServerState::new(
            config,
            catalog_store.clone(),
            server_store,
            query_engine,
            Some(scheduler_handle),
        );
        let app = make_app(state);

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            catalog_store,
            _temp_db_dir: temp_db_dir,
            shutdown,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
