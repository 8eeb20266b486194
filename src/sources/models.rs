use crate::catalog_store::{ContentScores, ScoreValidationError};
use crate::server_store::ErrorKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// One title as listed by the content-rating source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRatingListing {
    /// Identity of the listing on the content-rating source (page slug).
    pub source_key: String,
    pub title: String,
    pub year: Option<i32>,
    pub scores: ContentScores,
    pub source_available: bool,
}

/// One page of content-rating listings.
///
/// Items that failed to parse are kept in place as errors so the caller can
/// count and log them without losing the rest of the page.
#[derive(Debug)]
pub struct RatingsPage {
    pub items: Vec<Result<ContentRatingListing, SourceError>>,
    /// Cursor for the following page, None when the listing is exhausted.
    pub next_cursor: Option<String>,
}

impl RatingsPage {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("rate limited by source (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("malformed listing {key}: {reason}")]
    MalformedListing { key: String, reason: String },

    #[error("validation failure for {key}: {source}")]
    ValidationFailure {
        key: String,
        #[source]
        source: ScoreValidationError,
    },

    /// The source refused the credentials; retrying cannot help.
    #[error("rejected by source: {0}")]
    Unauthorized(String),

    /// A failure fetching one listing of a page, tagged with its key.
    #[error("listing {key}: {source}")]
    Listing {
        key: String,
        #[source]
        source: Box<SourceError>,
    },
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::SourceUnreachable(_) => ErrorKind::SourceUnreachable,
            SourceError::RateLimited { .. } => ErrorKind::RateLimited,
            SourceError::MalformedListing { .. } => ErrorKind::MalformedListing,
            SourceError::ValidationFailure { .. } => ErrorKind::ValidationFailure,
            SourceError::Unauthorized(_) => ErrorKind::Unauthorized,
            SourceError::Listing { source, .. } => source.kind(),
        }
    }

    /// Listing key the error belongs to, when known.
    pub fn key(&self) -> Option<&str> {
        match self {
            SourceError::MalformedListing { key, .. }
            | SourceError::ValidationFailure { key, .. }
            | SourceError::Listing { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Tag the error with the listing it happened on, unless it already names one.
    pub fn for_listing(self, key: &str) -> Self {
        if self.key().is_some() {
            return self;
        }
        SourceError::Listing {
            key: key.to_string(),
            source: Box::new(self),
        }
    }

    /// Network trouble and rate limits are worth another attempt; bad data is not.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Mandatory cool-down requested by the source, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after } => *retry_after,
            SourceError::Listing { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        SourceError::MalformedListing {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.status().map(|s| s.as_u16()) == Some(429) {
            return SourceError::RateLimited { retry_after: None };
        }
        if err.is_decode() {
            return SourceError::MalformedListing {
                key: err
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "<response>".to_string()),
                reason: err.to_string(),
            };
        }
        SourceError::SourceUnreachable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::ScoreCategory;

    #[test]
    fn retryable_kinds() {
        assert!(SourceError::SourceUnreachable("timeout".into()).is_retryable());
        assert!(SourceError::RateLimited { retry_after: None }.is_retryable());
        assert!(!SourceError::malformed("x", "no scores").is_retryable());
        assert!(!SourceError::ValidationFailure {
            key: "x".into(),
            source: ScoreValidationError {
                category: ScoreCategory::Sex,
                value: 12
            }
        }
        .is_retryable());
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        let err = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(
            SourceError::SourceUnreachable("down".into()).retry_after(),
            None
        );
    }

    #[test]
    fn unauthorized_is_not_retried() {
        let err = SourceError::Unauthorized("Invalid API key!".into());
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(!err.is_retryable());
    }

    #[test]
    fn listing_tag_keeps_kind_and_cooldown() {
        let err = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        }
        .for_listing("movie/ronin");
        assert_eq!(err.key(), Some("movie/ronin"));
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));

        let malformed = SourceError::malformed("movie/heat", "no scores").for_listing("other");
        assert_eq!(malformed.key(), Some("movie/heat"));
        assert!(matches!(malformed, SourceError::MalformedListing { .. }));
    }
}
