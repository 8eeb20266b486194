use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Background jobs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobRunStatus::Running),
            "completed" => Some(JobRunStatus::Completed),
            "failed" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub id: i64,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    /// How the job was triggered: "schedule", "hook:OnStartup", "manual", etc.
    pub triggered_by: String,
}

#[derive(Debug, Clone)]
pub struct JobScheduleState {
    pub job_id: String,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// Event types for job audit log entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAuditEventType {
    Started,
    Completed,
    Failed,
    Progress,
}

impl JobAuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAuditEventType::Started => "started",
            JobAuditEventType::Completed => "completed",
            JobAuditEventType::Failed => "failed",
            JobAuditEventType::Progress => "progress",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(JobAuditEventType::Started),
            "completed" => Some(JobAuditEventType::Completed),
            "failed" => Some(JobAuditEventType::Failed),
            "progress" => Some(JobAuditEventType::Progress),
            _ => None,
        }
    }
}

/// An entry in the job audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAuditEntry {
    pub id: i64,
    pub job_id: String,
    pub event_type: JobAuditEventType,
    /// Unix timestamp when the event occurred
    pub timestamp: i64,
    pub duration_ms: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
}

// =============================================================================
// Refresh cycle logs
// =============================================================================

/// Error taxonomy shared by the refresh pipeline, the review queue and the
/// persisted cycle logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnreachable,
    RateLimited,
    MalformedListing,
    ValidationFailure,
    Unauthorized,
    ReviewConflict,
    NotFound,
    Cancelled,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SourceUnreachable => "source_unreachable",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::MalformedListing => "malformed_listing",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::ReviewConflict => "review_conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Storage => "storage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source_unreachable" => Some(ErrorKind::SourceUnreachable),
            "rate_limited" => Some(ErrorKind::RateLimited),
            "malformed_listing" => Some(ErrorKind::MalformedListing),
            "validation_failure" => Some(ErrorKind::ValidationFailure),
            "unauthorized" => Some(ErrorKind::Unauthorized),
            "review_conflict" => Some(ErrorKind::ReviewConflict),
            "not_found" => Some(ErrorKind::NotFound),
            "cancelled" => Some(ErrorKind::Cancelled),
            "storage" => Some(ErrorKind::Storage),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::SourceUnreachable | ErrorKind::RateLimited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Success,
    Partial,
    Failed,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Success => "success",
            CycleStatus::Partial => "partial",
            CycleStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(CycleStatus::Success),
            "partial" => Some(CycleStatus::Partial),
            "failed" => Some(CycleStatus::Failed),
            _ => None,
        }
    }

    /// Worst of two statuses.
    pub fn combine(self, other: CycleStatus) -> CycleStatus {
        use CycleStatus::*;
        match (self, other) {
            (Failed, _) | (_, Failed) => Failed,
            (Partial, _) | (_, Partial) => Partial,
            _ => Success,
        }
    }
}

/// Which upstream an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    ContentRating,
    Metadata,
    Store,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleError {
    pub kind: ErrorKind,
    pub source: SourceRole,
    /// Listing key or natural key the error relates to.
    pub key: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCounts {
    /// Listings received from the content-rating source, including malformed ones.
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub queued_for_review: usize,
    /// Listings whose best candidate fell in the reject band (or had none).
    pub unmatched: usize,
    pub flagged_unavailable: usize,
}

/// Immutable record of one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshCycleLog {
    pub id: String,
    pub triggered_by: String,
    pub status: CycleStatus,
    pub content_rating_status: CycleStatus,
    pub metadata_status: CycleStatus,
    pub counts: CycleCounts,
    pub errors: Vec<CycleError>,
    /// Natural keys flagged as no longer listed by the content-rating source.
    pub flagged: Vec<String>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_keeps_worst_status() {
        use CycleStatus::*;
        assert_eq!(Success.combine(Success), Success);
        assert_eq!(Success.combine(Partial), Partial);
        assert_eq!(Partial.combine(Failed), Failed);
        assert_eq!(Failed.combine(Success), Failed);
    }

    #[test]
    fn error_kind_round_trips_through_str() {
        for kind in [
            ErrorKind::SourceUnreachable,
            ErrorKind::RateLimited,
            ErrorKind::MalformedListing,
            ErrorKind::ValidationFailure,
            ErrorKind::Unauthorized,
            ErrorKind::ReviewConflict,
            ErrorKind::NotFound,
            ErrorKind::Cancelled,
            ErrorKind::Storage,
        ] {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::MalformedListing.is_retryable());
        assert!(!ErrorKind::Unauthorized.is_retryable());
    }
}
