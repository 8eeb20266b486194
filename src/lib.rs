//! Reelfilter Catalog Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod background_jobs;
pub mod catalog_store;
pub mod config;
pub mod matching;
pub mod refresh;
pub mod review_queue;
pub mod search;
pub mod server;
pub mod server_store;
pub mod sources;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use refresh::RefreshOrchestrator;
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
pub use server_store::{ServerStore, SqliteServerStore};
