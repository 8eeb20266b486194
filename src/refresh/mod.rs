//! Refresh pipeline: reads the content-rating source, matches listings against
//! metadata candidates and reconciles the catalog.

mod key_locks;
mod orchestrator;
mod retry;

pub use key_locks::KeyLocks;
pub use orchestrator::RefreshOrchestrator;
pub use retry::{sleep_unless_cancelled, with_retry, RetryPolicy};
