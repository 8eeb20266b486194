//! Matching engine.
//!
//! Pairs one content-rating listing with the best metadata candidate. Every
//! function here is pure: the same inputs always give the same decision.

mod similarity;

pub use similarity::{normalize_title, partial_ratio, title_similarity, token_sort_ratio};

use crate::catalog_store::MovieMetadata;
use crate::config::MatchingSettings;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchDecision {
    AutoAccept,
    NeedsReview,
    Reject,
}

impl MatchDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchDecision::AutoAccept => "auto_accept",
            MatchDecision::NeedsReview => "needs_review",
            MatchDecision::Reject => "reject",
        }
    }
}

/// Policy constants of the matching engine.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    pub auto_accept_threshold: f64,
    pub review_threshold: f64,
    pub title_weight: f64,
    pub year_weight: f64,
    pub year_tolerance: i32,
}

impl MatchConfig {
    pub fn new(settings: &MatchingSettings) -> Self {
        Self {
            auto_accept_threshold: settings.auto_accept_threshold,
            review_threshold: settings.review_threshold,
            title_weight: settings.title_weight,
            year_weight: settings.year_weight,
            year_tolerance: settings.year_tolerance,
        }
    }

    /// `> auto_accept` accepts, `review..=auto_accept` needs review, anything
    /// lower is rejected.
    pub fn decide(&self, confidence: f64) -> MatchDecision {
        if confidence > self.auto_accept_threshold {
            MatchDecision::AutoAccept
        } else if confidence >= self.review_threshold {
            MatchDecision::NeedsReview
        } else {
            MatchDecision::Reject
        }
    }

    /// Full year bonus when both years are known and at most `year_tolerance`
    /// apart, nothing otherwise. A larger gap is never compensated.
    pub fn year_bonus(&self, listing_year: Option<i32>, candidate_year: Option<i32>) -> f64 {
        match (listing_year, candidate_year) {
            (Some(a), Some(b)) if (a - b).abs() <= self.year_tolerance => 100.0,
            _ => 0.0,
        }
    }

    /// Weighted confidence on a 0-100 scale, rounded to two decimals.
    pub fn confidence(
        &self,
        listing_title: &str,
        listing_year: Option<i32>,
        candidate_title: &str,
        candidate_year: Option<i32>,
    ) -> f64 {
        let title = title_similarity(listing_title, candidate_title);
        let raw = self.title_weight * title
            + self.year_weight * self.year_bonus(listing_year, candidate_year);
        round_confidence(raw.clamp(0.0, 100.0))
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self::new(&MatchingSettings::default())
    }
}

pub fn round_confidence(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One metadata candidate with its computed confidence and decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: MovieMetadata,
    pub confidence: f64,
    pub decision: MatchDecision,
    year_distance: Option<i32>,
}

/// Outcome of matching one listing against its candidate pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    /// Best candidate, None when the pool was empty.
    pub best: Option<ScoredCandidate>,
    /// Every candidate, best first.
    pub ranked: Vec<ScoredCandidate>,
}

impl MatchOutcome {
    pub fn decision(&self) -> MatchDecision {
        self.best
            .as_ref()
            .map(|b| b.decision)
            .unwrap_or(MatchDecision::Reject)
    }

    pub fn confidence(&self) -> f64 {
        self.best.as_ref().map(|b| b.confidence).unwrap_or(0.0)
    }
}

pub fn score_candidate(
    config: &MatchConfig,
    listing_title: &str,
    listing_year: Option<i32>,
    candidate: &MovieMetadata,
) -> ScoredCandidate {
    let confidence = config.confidence(listing_title, listing_year, &candidate.title, candidate.year);
    ScoredCandidate {
        candidate: candidate.clone(),
        confidence,
        decision: config.decide(confidence),
        year_distance: match (listing_year, candidate.year) {
            (Some(a), Some(b)) => Some((a - b).abs()),
            _ => None,
        },
    }
}

/// Highest confidence first; exact ties go to the closer year, then to the
/// smaller natural key so the order never depends on input order.
fn compare_ranked(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| match (a.year_distance, b.year_distance) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.candidate.natural_key.cmp(&b.candidate.natural_key))
}

/// Match a listing against a pool of metadata candidates.
pub fn match_listing(
    config: &MatchConfig,
    listing_title: &str,
    listing_year: Option<i32>,
    pool: &[MovieMetadata],
) -> MatchOutcome {
    let mut ranked: Vec<ScoredCandidate> = pool
        .iter()
        .map(|c| score_candidate(config, listing_title, listing_year, c))
        .collect();
    ranked.sort_by(compare_ranked);
    MatchOutcome {
        best: ranked.first().cloned(),
        ranked,
    }
}
