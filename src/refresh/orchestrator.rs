//! Refresh orchestrator.
//!
//! One cycle lists the content-rating source first, then looks up metadata
//! candidates only for the listed titles, matches each listing and writes the
//! accepted matches. Per-listing failures are recorded and never abort the
//! cycle.

use super::key_locks::KeyLocks;
use super::retry::{with_retry, RetryPolicy};
use crate::catalog_store::{AcceptedMatch, CatalogStore, MovieMetadata};
use crate::config::{MatchingSettings, RefreshSettings};
use crate::matching::{match_listing, MatchConfig, MatchDecision};
use crate::review_queue::{EnqueueOutcome, ReviewQueue};
use crate::server::metrics;
use crate::server_store::{
    CycleCounts, CycleError, CycleStatus, ErrorKind, RefreshCycleLog, ServerStore, SourceRole,
};
use crate::sources::{ContentRatingListing, ContentRatingSource, MetadataSource, SourceError};
use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What happened to one listing.
#[derive(Debug, Clone, PartialEq)]
enum ListingOutcome {
    Created,
    Updated,
    Unchanged,
    QueuedForReview,
    Unmatched,
    Failed(CycleError),
    /// Not processed because the cycle was cancelled.
    Skipped,
}

impl ListingOutcome {
    fn label(&self) -> &'static str {
        match self {
            ListingOutcome::Created => "created",
            ListingOutcome::Updated => "updated",
            ListingOutcome::Unchanged => "unchanged",
            ListingOutcome::QueuedForReview => "queued_for_review",
            ListingOutcome::Unmatched => "unmatched",
            ListingOutcome::Failed(_) => "failed",
            ListingOutcome::Skipped => "skipped",
        }
    }

    fn succeeded(&self) -> bool {
        !matches!(self, ListingOutcome::Failed(_) | ListingOutcome::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MetadataLookup {
    NotAttempted,
    Succeeded,
    Unreachable,
    Failed,
}

struct ListingReport {
    outcome: ListingOutcome,
    lookup: MetadataLookup,
}

impl ListingReport {
    fn new(outcome: ListingOutcome, lookup: MetadataLookup) -> Self {
        Self { outcome, lookup }
    }
}

/// Result of the listing phase.
#[derive(Default)]
struct ListingPhase {
    listings: Vec<ContentRatingListing>,
    /// Every listing key seen, including malformed ones.
    seen_keys: HashSet<String>,
    errors: Vec<CycleError>,
    item_failures: usize,
    /// Item failures that could not be tied to a listing key.
    unkeyed_item_failures: usize,
    first_page_failed: bool,
    later_page_failed: bool,
    /// The listing was read until the source reported its end.
    complete: bool,
}

fn source_error(role: SourceRole, key: Option<&str>, err: &SourceError) -> CycleError {
    CycleError {
        kind: err.kind(),
        source: role,
        key: key.map(str::to_string),
        message: err.to_string(),
    }
}

pub struct RefreshOrchestrator {
    ratings: Arc<dyn ContentRatingSource>,
    metadata: Arc<dyn MetadataSource>,
    catalog: Arc<dyn CatalogStore>,
    server_store: Arc<dyn ServerStore>,
    review_queue: ReviewQueue,
    match_config: MatchConfig,
    settings: RefreshSettings,
    retry: RetryPolicy,
    key_locks: KeyLocks,
}

impl RefreshOrchestrator {
    pub fn new(
        ratings: Arc<dyn ContentRatingSource>,
        metadata: Arc<dyn MetadataSource>,
        catalog: Arc<dyn CatalogStore>,
        server_store: Arc<dyn ServerStore>,
        matching: &MatchingSettings,
        settings: &RefreshSettings,
    ) -> Self {
        Self {
            ratings,
            metadata,
            review_queue: ReviewQueue::new(catalog.clone()),
            catalog,
            server_store,
            match_config: MatchConfig::new(matching),
            settings: settings.clone(),
            retry: RetryPolicy::new(settings),
            key_locks: KeyLocks::new(),
        }
    }

    /// Run one full cycle and append its log.
    ///
    /// Only a failure to persist the cycle log itself is returned as an error;
    /// everything else ends up in the log.
    pub fn run_cycle(
        &self,
        cancel: &CancellationToken,
        triggered_by: &str,
    ) -> Result<RefreshCycleLog> {
        let id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!("Refresh cycle {} started (trigger: {})", id, triggered_by);

        let listing = self.list_ratings(cancel);
        let mut errors = listing.errors.clone();
        let mut counts = CycleCounts {
            fetched: listing.listings.len() + listing.item_failures,
            failed: listing.item_failures,
            ..Default::default()
        };

        let reports = self.process_listings(&listing.listings, cancel, &id)?;

        let mut lookups_attempted = 0;
        let mut lookups_unreachable = 0;
        let mut metadata_failures = 0;
        let mut successes = 0;
        for report in &reports {
            match report.lookup {
                MetadataLookup::NotAttempted => {}
                MetadataLookup::Succeeded => lookups_attempted += 1,
                MetadataLookup::Unreachable => {
                    lookups_attempted += 1;
                    lookups_unreachable += 1;
                    metadata_failures += 1;
                }
                MetadataLookup::Failed => {
                    lookups_attempted += 1;
                    metadata_failures += 1;
                }
            }
            if report.outcome.succeeded() {
                successes += 1;
            }
            if report.outcome != ListingOutcome::Skipped {
                metrics::record_listing_outcome(report.outcome.label());
            }
            match &report.outcome {
                ListingOutcome::Created => counts.created += 1,
                ListingOutcome::Updated => counts.updated += 1,
                ListingOutcome::Unchanged => counts.unchanged += 1,
                ListingOutcome::QueuedForReview => counts.queued_for_review += 1,
                ListingOutcome::Unmatched => counts.unmatched += 1,
                ListingOutcome::Failed(error) => {
                    counts.failed += 1;
                    errors.push(error.clone());
                }
                ListingOutcome::Skipped => {}
            }
        }

        let cancelled = cancel.is_cancelled();
        let mut flagged = Vec::new();
        if cancelled {
            errors.push(CycleError {
                kind: ErrorKind::Cancelled,
                source: SourceRole::Store,
                key: None,
                message: "cycle cancelled before completion".to_string(),
            });
        } else if listing.unkeyed_item_failures > 0 {
            warn!(
                "{} listings failed without a key, skipping stale flagging",
                listing.unkeyed_item_failures
            );
        } else if listing.complete && !listing.seen_keys.is_empty() {
            match self.catalog.flag_unavailable(&listing.seen_keys) {
                Ok(entries) => {
                    for entry in &entries {
                        info!(
                            "Flagged {} as no longer listed ({})",
                            entry.natural_key, entry.source_key
                        );
                    }
                    flagged = entries.into_iter().map(|e| e.natural_key).collect();
                }
                Err(err) => errors.push(CycleError {
                    kind: ErrorKind::Storage,
                    source: SourceRole::Store,
                    key: None,
                    message: format!("failed to flag unavailable entries: {:#}", err),
                }),
            }
        } else if listing.complete {
            warn!("Content-rating source listed nothing, skipping stale flagging");
        }
        counts.flagged_unavailable = flagged.len();

        let content_rating_status = if listing.first_page_failed {
            CycleStatus::Failed
        } else if listing.later_page_failed || listing.item_failures > 0 {
            CycleStatus::Partial
        } else {
            CycleStatus::Success
        };
        let metadata_status = if lookups_attempted > 0 && lookups_unreachable == lookups_attempted
        {
            CycleStatus::Failed
        } else if metadata_failures > 0 {
            CycleStatus::Partial
        } else {
            CycleStatus::Success
        };
        let status = if cancelled {
            CycleStatus::Partial
        } else if listing.first_page_failed
            || (successes == 0 && metadata_status == CycleStatus::Failed)
        {
            CycleStatus::Failed
        } else if !errors.is_empty() || counts.failed > 0 {
            CycleStatus::Partial
        } else {
            CycleStatus::Success
        };

        let finished_at = Utc::now();
        let log = RefreshCycleLog {
            id,
            triggered_by: triggered_by.to_string(),
            status,
            content_rating_status,
            metadata_status,
            counts,
            errors,
            flagged,
            cancelled,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        };

        self.server_store
            .append_cycle_log(&log)
            .context("Failed to append refresh cycle log")?;

        metrics::record_refresh_cycle(
            log.status.as_str(),
            std::time::Duration::from_millis(log.duration_ms.max(0) as u64),
        );
        if let Ok(total) = self.catalog.count_entries() {
            metrics::set_catalog_entries(total);
        }
        info!(
            "Refresh cycle {} finished: {} in {}ms (fetched {}, created {}, updated {}, unchanged {}, \
             queued {}, unmatched {}, failed {}, flagged {}{})",
            log.id,
            log.status.as_str(),
            log.duration_ms,
            log.counts.fetched,
            log.counts.created,
            log.counts.updated,
            log.counts.unchanged,
            log.counts.queued_for_review,
            log.counts.unmatched,
            log.counts.failed,
            log.counts.flagged_unavailable,
            if log.cancelled { ", cancelled" } else { "" }
        );
        Ok(log)
    }

    /// Read the content-rating listing page by page.
    fn list_ratings(&self, cancel: &CancellationToken) -> ListingPhase {
        let mut phase = ListingPhase::default();
        let mut cursor: Option<String> = None;

        for page_index in 0..self.settings.max_listing_pages {
            if cancel.is_cancelled() {
                return phase;
            }

            let label = format!("{} page {}", self.ratings.name(), page_index + 1);
            let page = match with_retry(&self.retry, cancel, &label, || {
                self.ratings.list_ratings_since(cursor.as_deref())
            }) {
                Ok(page) => page,
                Err(err) => {
                    warn!("Failed to read {}: {}", label, err);
                    metrics::record_source_error("content_rating", err.kind().as_str());
                    phase
                        .errors
                        .push(source_error(SourceRole::ContentRating, None, &err));
                    if page_index == 0 {
                        phase.first_page_failed = true;
                    } else {
                        phase.later_page_failed = true;
                    }
                    return phase;
                }
            };

            let item_count = page.items.len();
            for item in page.items {
                match item {
                    Ok(listing) => {
                        if phase.seen_keys.insert(listing.source_key.clone()) {
                            phase.listings.push(listing);
                        } else {
                            debug!("Duplicate listing {} ignored", listing.source_key);
                        }
                    }
                    Err(err) => {
                        let key = err.key();
                        warn!("Skipping listing {:?}: {}", key, err);
                        metrics::record_source_error("content_rating", err.kind().as_str());
                        match key {
                            Some(key) => {
                                phase.seen_keys.insert(key.to_string());
                            }
                            None => phase.unkeyed_item_failures += 1,
                        }
                        phase.item_failures += 1;
                        phase
                            .errors
                            .push(source_error(SourceRole::ContentRating, key, &err));
                    }
                }
            }
            info!(
                "Read {} ({} items, {} listings so far)",
                label,
                item_count,
                phase.listings.len()
            );

            match page.next_cursor {
                Some(next) if item_count > 0 => cursor = Some(next),
                _ => {
                    phase.complete = true;
                    return phase;
                }
            }
        }

        debug!(
            "Stopped after {} listing pages without reaching the end",
            self.settings.max_listing_pages
        );
        phase
    }

    fn process_listings(
        &self,
        listings: &[ContentRatingListing],
        cancel: &CancellationToken,
        cycle_id: &str,
    ) -> Result<Vec<ListingReport>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.max_workers)
            .thread_name(|i| format!("refresh-worker-{}", i))
            .build()
            .context("Failed to build refresh worker pool")?;

        Ok(pool.install(|| {
            listings
                .par_iter()
                .map(|listing| self.process_listing(listing, cancel, cycle_id))
                .collect()
        }))
    }

    fn process_listing(
        &self,
        listing: &ContentRatingListing,
        cancel: &CancellationToken,
        cycle_id: &str,
    ) -> ListingReport {
        use MetadataLookup::*;

        if cancel.is_cancelled() {
            return ListingReport::new(ListingOutcome::Skipped, NotAttempted);
        }
        let key = Some(listing.source_key.as_str());

        if let Err(source) = listing.scores.validate() {
            let err = SourceError::ValidationFailure {
                key: listing.source_key.clone(),
                source,
            };
            warn!("Rejecting listing {}: {}", listing.source_key, err);
            return ListingReport::new(
                ListingOutcome::Failed(source_error(SourceRole::ContentRating, key, &err)),
                NotAttempted,
            );
        }

        let label = format!("{} lookup '{}'", self.metadata.name(), listing.title);
        let mut pool = match with_retry(&self.retry, cancel, &label, || {
            self.metadata.find_candidates(&listing.title, listing.year)
        }) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!("Metadata lookup failed for {}: {}", listing.source_key, err);
                metrics::record_source_error("metadata", err.kind().as_str());
                // A refused key makes the source as unusable as a dead connection.
                let lookup = if err.is_retryable() || err.kind() == ErrorKind::Unauthorized {
                    Unreachable
                } else {
                    Failed
                };
                return ListingReport::new(
                    ListingOutcome::Failed(source_error(SourceRole::Metadata, key, &err)),
                    lookup,
                );
            }
        };

        let outcome = match self.reconcile(listing, &mut pool, cycle_id) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Failed to store {}: {:#}", listing.source_key, err);
                ListingOutcome::Failed(CycleError {
                    kind: ErrorKind::Storage,
                    source: SourceRole::Store,
                    key: key.map(str::to_string),
                    message: format!("{:#}", err),
                })
            }
        };
        ListingReport::new(outcome, Succeeded)
    }

    /// Match a listing against its candidates and apply the decision.
    fn reconcile(
        &self,
        listing: &ContentRatingListing,
        pool: &mut Vec<MovieMetadata>,
        cycle_id: &str,
    ) -> Result<ListingOutcome> {
        let mapping = self.catalog.find_mapping_for_listing(&listing.source_key)?;
        if let Some(mapping) = &mapping {
            if !pool.iter().any(|c| c.natural_key == mapping.natural_key) {
                if let Some(hit) = self.catalog.get_entry(&mapping.natural_key)? {
                    pool.push(hit.entry.metadata);
                }
            }
        }

        let outcome = match_listing(&self.match_config, &listing.title, listing.year, pool);
        let Some(best) = outcome.best else {
            metrics::record_match_decision(MatchDecision::Reject.as_str());
            debug!("No candidates for '{}'", listing.title);
            return Ok(ListingOutcome::Unmatched);
        };

        // A human already confirmed this pairing.
        let confirmed = mapping
            .as_ref()
            .map(|m| m.reviewed && m.natural_key == best.candidate.natural_key)
            .unwrap_or(false);
        let decision = if confirmed {
            MatchDecision::AutoAccept
        } else {
            best.decision
        };
        metrics::record_match_decision(decision.as_str());

        match decision {
            MatchDecision::AutoAccept => {
                let accepted = AcceptedMatch {
                    metadata: best.candidate,
                    source_key: listing.source_key.clone(),
                    scores: listing.scores,
                    confidence: best.confidence,
                    reviewed: false,
                    changed_by: cycle_id.to_string(),
                };
                let upsert = self
                    .key_locks
                    .with_key(&accepted.metadata.natural_key, || {
                        self.catalog.reconcile_match(&accepted)
                    })?;
                Ok(if upsert.created() {
                    ListingOutcome::Created
                } else if upsert.updated() {
                    ListingOutcome::Updated
                } else {
                    ListingOutcome::Unchanged
                })
            }
            MatchDecision::NeedsReview => {
                if self.catalog.is_pairing_rejected(
                    &listing.source_key,
                    &best.candidate.natural_key,
                    best.confidence,
                )? {
                    debug!(
                        "Pairing {} -> {} was rejected at {:.2}, not re-proposing",
                        listing.source_key, best.candidate.natural_key, best.confidence
                    );
                    return Ok(ListingOutcome::Unmatched);
                }
                match self
                    .review_queue
                    .enqueue(listing, &best.candidate, best.confidence)
                    .map_err(anyhow::Error::from)?
                {
                    EnqueueOutcome::Created(_) | EnqueueOutcome::Refreshed(_) => {
                        Ok(ListingOutcome::QueuedForReview)
                    }
                }
            }
            MatchDecision::Reject => {
                debug!(
                    "Best candidate for '{}' is {} at {:.2}, below review threshold",
                    listing.title, best.candidate.natural_key, best.confidence
                );
                Ok(ListingOutcome::Unmatched)
            }
        }
    }
}
