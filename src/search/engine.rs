//! Content-filtered query engine.

use super::filters::{PageRequest, SearchError, SearchFilters};
use super::predicate::compile;
use crate::catalog_store::{CatalogHit, CatalogStore};
use crate::config::SearchSettings;
use crate::server::metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Raw rows returned by the store for one page.
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub entries: Vec<CatalogHit>,
    /// Matching entries across all pages.
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    pub fn new(page: &PageRequest, total: usize) -> Self {
        let total_pages = total.div_ceil(page.per_page);
        Self {
            page: page.page,
            per_page: page.per_page,
            total,
            total_pages,
            has_next: page.page < total_pages,
            has_prev: page.page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub entries: Vec<CatalogHit>,
    pub page_info: PageInfo,
}

/// Stateless per request; holds no lock across a search beyond the single
/// read connection the store hands out.
pub struct QueryEngine {
    store: Arc<dyn CatalogStore>,
    settings: SearchSettings,
    authority_threshold: f64,
}

impl QueryEngine {
    /// `authority_threshold` is the matching auto-accept threshold: unreviewed
    /// score records at or below it are treated as missing.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        settings: SearchSettings,
        authority_threshold: f64,
    ) -> Self {
        Self {
            store,
            settings,
            authority_threshold,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn authority_threshold(&self) -> f64 {
        self.authority_threshold
    }

    pub fn search(
        &self,
        filters: &SearchFilters,
        page: &PageRequest,
    ) -> Result<SearchPage, SearchError> {
        filters.validate()?;
        page.validate(self.settings.max_per_page)?;

        let start = Instant::now();
        let compiled = compile(filters, page, self.authority_threshold);
        let results = self.store.search_entries(&compiled)?;
        metrics::record_db_query("search_entries", start.elapsed());
        debug!(
            "Search returned {} of {} entries in {:?}",
            results.entries.len(),
            results.total,
            start.elapsed()
        );

        Ok(SearchPage {
            page_info: PageInfo::new(page, results.total),
            entries: results.entries,
        })
    }
}
