//! Review queue for needs-review matches.

mod models;

pub use models::*;

use crate::catalog_store::{CatalogStore, MovieMetadata, ReviewResolution};
use crate::server::metrics;
use crate::sources::ContentRatingListing;
use std::sync::Arc;
use tracing::{info, warn};

/// Service in front of the review queue rows of the catalog store.
pub struct ReviewQueue {
    store: Arc<dyn CatalogStore>,
}

impl ReviewQueue {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Enqueue a pairing. Re-enqueuing a pending pair only refreshes its confidence.
    pub fn enqueue(
        &self,
        listing: &ContentRatingListing,
        candidate: &MovieMetadata,
        confidence: f64,
    ) -> Result<EnqueueOutcome, ReviewError> {
        let outcome = self.store.enqueue_review(listing, candidate, confidence)?;
        if let EnqueueOutcome::Created(id) = &outcome {
            info!(
                "Queued review {}: '{}' -> {} ({:.2})",
                id, listing.title, candidate.natural_key, confidence
            );
        }
        Ok(outcome)
    }

    pub fn list_pending(&self) -> Result<Vec<ReviewQueueEntry>, ReviewError> {
        let pending = self.store.list_pending_reviews()?;
        metrics::set_pending_reviews(pending.len());
        Ok(pending)
    }

    pub fn get(&self, id: &str) -> Result<ReviewQueueEntry, ReviewError> {
        self.store
            .get_review(id)?
            .ok_or_else(|| ReviewError::NotFound(id.to_string()))
    }

    /// Resolve a pending entry; approval writes the match with `reviewed = true`.
    pub fn resolve(
        &self,
        id: &str,
        decision: ReviewDecision,
        resolved_by: &str,
    ) -> Result<ReviewResolution, ReviewError> {
        let resolved_by = resolved_by.trim();
        if resolved_by.is_empty() {
            return Err(ReviewError::Invalid {
                id: id.to_string(),
                reason: "resolved_by must not be empty".to_string(),
            });
        }

        match self.store.resolve_review(id, decision, resolved_by) {
            Ok(resolution) => {
                metrics::record_review_resolution(resolution.entry.state.as_str());
                info!(
                    "Review {} {} by {} ('{}' -> {})",
                    id,
                    resolution.entry.state.as_str(),
                    resolved_by,
                    resolution.entry.listing.title,
                    resolution.entry.candidate.natural_key
                );
                Ok(resolution)
            }
            Err(err) => {
                metrics::record_review_resolution(err.kind().as_str());
                warn!("Failed to resolve review {}: {}", id, err);
                Err(err)
            }
        }
    }
}
