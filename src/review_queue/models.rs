use crate::catalog_store::MovieMetadata;
use crate::server_store::ErrorKind;
use crate::sources::ContentRatingListing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resolution state of a review queue entry.
///
/// `Pending` moves to `Approved` or `Rejected`, both terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Pending,
    Approved,
    Rejected,
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Pending => "pending",
            ReviewState::Approved => "approved",
            ReviewState::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReviewState::Pending),
            "approved" => Some(ReviewState::Approved),
            "rejected" => Some(ReviewState::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReviewState::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub fn resulting_state(&self) -> ReviewState {
        match self {
            ReviewDecision::Approve => ReviewState::Approved,
            ReviewDecision::Reject => ReviewState::Rejected,
        }
    }
}

/// A needs-review pairing waiting for (or resolved by) a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueueEntry {
    pub id: String,
    pub listing: ContentRatingListing,
    pub candidate: MovieMetadata,
    pub confidence: f64,
    pub enqueued_at: DateTime<Utc>,
    pub state: ReviewState,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

/// Result of enqueuing a pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new pending entry was created.
    Created(String),
    /// A pending entry for the same pairing already existed and was refreshed.
    Refreshed(String),
}

impl EnqueueOutcome {
    pub fn id(&self) -> &str {
        match self {
            EnqueueOutcome::Created(id) | EnqueueOutcome::Refreshed(id) => id,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review entry {0} not found")]
    NotFound(String),

    #[error("review entry {id} was already {state:?}")]
    ReviewConflict { id: String, state: ReviewState },

    #[error("invalid review entry {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ReviewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReviewError::NotFound(_) => ErrorKind::NotFound,
            ReviewError::ReviewConflict { .. } => ErrorKind::ReviewConflict,
            ReviewError::Invalid { .. } => ErrorKind::ValidationFailure,
            ReviewError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<rusqlite::Error> for ReviewError {
    fn from(err: rusqlite::Error) -> Self {
        ReviewError::Storage(err.into())
    }
}
