//! Background job implementations.

pub mod refresh_catalog;

pub use refresh_catalog::{RefreshCatalogJob, REFRESH_CATALOG_JOB_ID};
