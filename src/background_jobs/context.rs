use crate::catalog_store::CatalogStore;
use crate::server_store::ServerStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Contains references to shared resources and a cancellation token
/// for graceful shutdown handling.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    pub catalog_store: Arc<dyn CatalogStore>,

    /// Access to server-side state (job history, schedules, cycle logs).
    pub server_store: Arc<dyn ServerStore>,

    /// What started this run: "schedule", "manual" or "hook:<event>".
    pub triggered_by: String,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        catalog_store: Arc<dyn CatalogStore>,
        server_store: Arc<dyn ServerStore>,
    ) -> Self {
        Self {
            cancellation_token,
            catalog_store,
            server_store,
            triggered_by: "manual".to_string(),
        }
    }

    /// Copy of this context for one run.
    pub fn for_run(&self, cancellation_token: CancellationToken, triggered_by: &str) -> Self {
        Self {
            cancellation_token,
            catalog_store: Arc::clone(&self.catalog_store),
            server_store: Arc::clone(&self.server_store),
            triggered_by: triggered_by.to_string(),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
