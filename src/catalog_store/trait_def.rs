//! CatalogStore trait definition.
//!
//! The persistence gateway for reconciled catalog data. The refresh pipeline,
//! the review queue and the query engine all go through this trait so that each
//! of them can be exercised against a throwaway database in tests.

use super::models::*;
use crate::review_queue::{EnqueueOutcome, ReviewDecision, ReviewError, ReviewQueueEntry};
use crate::search::{CompiledSearch, SearchResults};
use crate::sources::ContentRatingListing;
use anyhow::Result;
use std::collections::HashSet;

/// Outcome of a successful review resolution.
#[derive(Debug, Clone)]
pub struct ReviewResolution {
    pub entry: ReviewQueueEntry,
    /// Set for approvals: what the approval wrote to the catalog.
    pub upsert: Option<UpsertOutcome>,
}

pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Entries and scores
    // =========================================================================

    fn get_entry(&self, natural_key: &str) -> Result<Option<CatalogHit>>;

    fn get_score_record(&self, natural_key: &str) -> Result<Option<ContentScoreRecord>>;

    /// Score record currently mapped to a content-rating listing, if any.
    fn find_mapping_for_listing(&self, source_key: &str) -> Result<Option<ContentScoreRecord>>;

    /// Upsert the entry and its score record in one transaction.
    ///
    /// Score overwrites are appended to the score change trail in the same
    /// transaction. Unchanged data produces no writes.
    fn reconcile_match(&self, accepted: &AcceptedMatch) -> Result<UpsertOutcome>;

    /// Mark every available score record whose listing is not in `seen_source_keys`
    /// as no longer available. Entries are never deleted.
    fn flag_unavailable(&self, seen_source_keys: &HashSet<String>) -> Result<Vec<FlaggedEntry>>;

    fn get_score_changes(&self, natural_key: &str) -> Result<Vec<ScoreChange>>;

    fn list_genres(&self) -> Result<Vec<String>>;

    fn count_entries(&self) -> Result<usize>;

    // =========================================================================
    // Review queue
    // =========================================================================

    /// Enqueue a needs-review pairing. A pending entry for the same
    /// (listing, candidate) pair is refreshed instead of duplicated.
    fn enqueue_review(
        &self,
        listing: &ContentRatingListing,
        candidate: &MovieMetadata,
        confidence: f64,
    ) -> Result<EnqueueOutcome>;

    /// Pending entries, highest confidence first.
    fn list_pending_reviews(&self) -> Result<Vec<ReviewQueueEntry>>;

    fn get_review(&self, id: &str) -> Result<Option<ReviewQueueEntry>>;

    /// Resolve a pending entry. Only one resolution per entry ever succeeds;
    /// later attempts get [`ReviewError::ReviewConflict`].
    fn resolve_review(
        &self,
        id: &str,
        decision: ReviewDecision,
        resolved_by: &str,
    ) -> Result<ReviewResolution, ReviewError>;

    /// Whether a reviewer already rejected this pairing at this confidence.
    fn is_pairing_rejected(&self, listing_key: &str, natural_key: &str, confidence: f64)
        -> Result<bool>;

    // =========================================================================
    // Search
    // =========================================================================

    fn search_entries(&self, query: &CompiledSearch) -> Result<SearchResults>;
}
