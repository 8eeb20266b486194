//! Reconciled catalog models.
//!
//! A [`CatalogEntry`] carries the metadata-source view of a title, a
//! [`ContentScoreRecord`] carries the content-rating-source view once a match
//! between the two has been accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inclusive upper bound of every content intensity score.
pub const MAX_CONTENT_SCORE: i32 = 10;

// =============================================================================
// Enumerations
// =============================================================================

/// MPAA-style content rating classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ContentClassification {
    #[serde(rename = "G")]
    G,
    #[serde(rename = "PG")]
    Pg,
    #[serde(rename = "PG-13")]
    Pg13,
    #[serde(rename = "R")]
    R,
    #[serde(rename = "NC-17")]
    Nc17,
    #[serde(rename = "Not Rated")]
    NotRated,
}

impl ContentClassification {
    pub const ALL: [ContentClassification; 6] = [
        ContentClassification::G,
        ContentClassification::Pg,
        ContentClassification::Pg13,
        ContentClassification::R,
        ContentClassification::Nc17,
        ContentClassification::NotRated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentClassification::G => "G",
            ContentClassification::Pg => "PG",
            ContentClassification::Pg13 => "PG-13",
            ContentClassification::R => "R",
            ContentClassification::Nc17 => "NC-17",
            ContentClassification::NotRated => "Not Rated",
        }
    }

    /// Parse a known classification, returning None for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Unknown upstream values ("TV-MA", "Approved", ...) collapse to NotRated.
    pub fn from_upstream(s: &str) -> Self {
        Self::parse(s).unwrap_or(ContentClassification::NotRated)
    }
}

/// The three content intensity categories.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCategory {
    Sex,
    Violence,
    Language,
}

impl ScoreCategory {
    pub const ALL: [ScoreCategory; 3] = [
        ScoreCategory::Sex,
        ScoreCategory::Violence,
        ScoreCategory::Language,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreCategory::Sex => "sex",
            ScoreCategory::Violence => "violence",
            ScoreCategory::Language => "language",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sex" => Some(ScoreCategory::Sex),
            "violence" => Some(ScoreCategory::Violence),
            "language" => Some(ScoreCategory::Language),
            _ => None,
        }
    }
}

// =============================================================================
// Content scores
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category:?} score {value} is outside 0..=10")]
pub struct ScoreValidationError {
    pub category: ScoreCategory,
    pub value: i32,
}

/// Sex/nudity, violence/gore and language intensity, each 0..=10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentScores {
    pub sex: i32,
    pub violence: i32,
    pub language: i32,
}

impl ContentScores {
    pub fn new(sex: i32, violence: i32, language: i32) -> Self {
        Self {
            sex,
            violence,
            language,
        }
    }

    pub fn get(&self, category: ScoreCategory) -> i32 {
        match category {
            ScoreCategory::Sex => self.sex,
            ScoreCategory::Violence => self.violence,
            ScoreCategory::Language => self.language,
        }
    }

    pub fn validate(&self) -> Result<(), ScoreValidationError> {
        for category in ScoreCategory::ALL {
            let value = self.get(category);
            if !(0..=MAX_CONTENT_SCORE).contains(&value) {
                return Err(ScoreValidationError { category, value });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Catalog entries
// =============================================================================

/// Metadata-source view of a title.
///
/// This is what metadata adapters return as match candidates and what gets
/// persisted as the catalog entry once a match is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieMetadata {
    /// Stable identifier assigned by the metadata source (IMDb id for OMDb).
    pub natural_key: String,
    pub title: String,
    pub year: Option<i32>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub classification: ContentClassification,
    /// 0.0..=10.0
    pub imdb_rating: Option<f64>,
    /// 0..=100
    pub rotten_tomatoes: Option<i32>,
    /// 0..=100
    pub metacritic: Option<i32>,
    #[serde(default)]
    pub award_wins: i32,
    #[serde(default)]
    pub award_nominations: i32,
    pub awards_summary: Option<String>,
    pub runtime_minutes: Option<i32>,
    pub plot: Option<String>,
    pub director: Option<String>,
    #[serde(default)]
    pub cast: Vec<String>,
    pub poster_url: Option<String>,
}

impl MovieMetadata {
    /// Minimal metadata with only the identifying fields set.
    pub fn new(natural_key: impl Into<String>, title: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            natural_key: natural_key.into(),
            title: title.into(),
            year,
            genres: Vec::new(),
            classification: ContentClassification::NotRated,
            imdb_rating: None,
            rotten_tomatoes: None,
            metacritic: None,
            award_wins: 0,
            award_nominations: 0,
            awards_summary: None,
            runtime_minutes: None,
            plot: None,
            director: None,
            cast: Vec::new(),
            poster_url: None,
        }
    }

    /// Drop provider scores that fall outside their valid range.
    pub fn sanitized(mut self) -> Self {
        self.imdb_rating = self.imdb_rating.filter(|r| (0.0..=10.0).contains(r));
        self.rotten_tomatoes = self.rotten_tomatoes.filter(|r| (0..=100).contains(r));
        self.metacritic = self.metacritic.filter(|r| (0..=100).contains(r));
        self.award_wins = self.award_wins.max(0);
        self.award_nominations = self.award_nominations.max(0);
        self
    }

    pub fn awards_total(&self) -> i32 {
        self.award_wins + self.award_nominations
    }
}

/// A persisted catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub metadata: MovieMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Content-rating-source view of an entry, at most one per catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentScoreRecord {
    pub natural_key: String,
    /// Identity of the listing on the content-rating source.
    pub source_key: String,
    pub scores: ContentScores,
    pub source_available: bool,
    pub match_confidence: f64,
    pub reviewed: bool,
    pub first_scraped_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentScoreRecord {
    /// Scores are authoritative once a human reviewed the match or the matcher
    /// was confident enough to accept it on its own.
    pub fn is_authoritative(&self, auto_accept_threshold: f64) -> bool {
        self.reviewed || self.match_confidence > auto_accept_threshold
    }
}

/// One recorded overwrite of a content score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub natural_key: String,
    pub category: ScoreCategory,
    pub old_value: Option<i32>,
    pub new_value: i32,
    /// Cycle id for refresh writes, resolver name for review approvals.
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

/// Catalog entry joined with its score record, as returned by searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogHit {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub content_scores: Option<ContentScoreRecord>,
}

// =============================================================================
// Writes
// =============================================================================

/// An accepted pairing of a content-rating listing with a metadata record.
#[derive(Debug, Clone)]
pub struct AcceptedMatch {
    pub metadata: MovieMetadata,
    pub source_key: String,
    pub scores: ContentScores,
    pub confidence: f64,
    pub reviewed: bool,
    pub changed_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Created,
    Updated,
    Unchanged,
}

/// What an upsert of an accepted match actually changed.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub entry: WriteKind,
    pub scores: WriteKind,
    pub score_changes: Vec<ScoreChange>,
}

impl UpsertOutcome {
    pub fn created(&self) -> bool {
        self.entry == WriteKind::Created
    }

    /// True when persisted content changed on an entry that already existed.
    pub fn updated(&self) -> bool {
        !self.created()
            && (self.entry == WriteKind::Updated || self.scores != WriteKind::Unchanged)
    }
}

/// An entry whose listing disappeared from the content-rating source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedEntry {
    pub natural_key: String,
    pub source_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_from_upstream_defaults_to_not_rated() {
        assert_eq!(
            ContentClassification::from_upstream("PG-13"),
            ContentClassification::Pg13
        );
        assert_eq!(
            ContentClassification::from_upstream("nc-17"),
            ContentClassification::Nc17
        );
        assert_eq!(
            ContentClassification::from_upstream("TV-MA"),
            ContentClassification::NotRated
        );
        assert_eq!(
            ContentClassification::from_upstream("N/A"),
            ContentClassification::NotRated
        );
    }

    #[test]
    fn score_validation_reports_first_bad_category() {
        assert!(ContentScores::new(0, 10, 5).validate().is_ok());

        let err = ContentScores::new(3, 11, -1).validate().unwrap_err();
        assert_eq!(err.category, ScoreCategory::Violence);
        assert_eq!(err.value, 11);
    }

    #[test]
    fn sanitized_drops_out_of_range_provider_scores() {
        let mut metadata = MovieMetadata::new("tt1", "Heat", Some(1995));
        metadata.imdb_rating = Some(12.0);
        metadata.rotten_tomatoes = Some(88);
        metadata.metacritic = Some(140);

        let metadata = metadata.sanitized();
        assert_eq!(metadata.imdb_rating, None);
        assert_eq!(metadata.rotten_tomatoes, Some(88));
        assert_eq!(metadata.metacritic, None);
    }

    #[test]
    fn authoritative_requires_review_or_auto_accept_confidence() {
        let now = Utc::now();
        let mut record = ContentScoreRecord {
            natural_key: "tt1".into(),
            source_key: "heat-1995".into(),
            scores: ContentScores::new(1, 2, 3),
            source_available: true,
            match_confidence: 80.0,
            reviewed: false,
            first_scraped_at: now,
            updated_at: now,
        };
        assert!(!record.is_authoritative(88.0));
        record.reviewed = true;
        assert!(record.is_authoritative(88.0));
        record.reviewed = false;
        record.match_confidence = 95.0;
        assert!(record.is_authoritative(88.0));
    }

    #[test]
    fn classification_serializes_as_display_string() {
        let json = serde_json::to_string(&ContentClassification::Pg13).unwrap();
        assert_eq!(json, "\"PG-13\"");
    }
}
