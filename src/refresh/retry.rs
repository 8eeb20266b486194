//! Retry policy for source calls.
//!
//! Implements exponential backoff with configurable parameters. Rate limits
//! additionally honor the cool-down the source asked for.

use crate::config::RefreshSettings;
use crate::sources::SourceError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Granularity at which a backoff sleep notices cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// Cap for exponential growth.
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(config: &RefreshSettings) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Whether another attempt should follow the `retry_count`-th failure.
    pub fn should_retry(&self, error: &SourceError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }

    /// `initial_backoff * multiplier^retry_count`, capped at `max_backoff_ms`.
    pub fn backoff_ms(&self, retry_count: u32) -> u64 {
        let backoff =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(retry_count as i32);
        backoff.min(self.max_backoff_ms as f64) as u64
    }

    /// Wait before the next attempt; a source-mandated cool-down wins when longer.
    pub fn delay_for(&self, error: &SourceError, retry_count: u32) -> Duration {
        let backoff = Duration::from_millis(self.backoff_ms(retry_count));
        match error.retry_after() {
            Some(cooldown) if cooldown > backoff => cooldown,
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RefreshSettings::default())
    }
}

/// Sleep for `duration` unless cancelled first. Returns false when cancelled.
pub fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, runs out of
/// retries, or the cycle is cancelled. The last error is returned on failure.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: impl FnMut() -> Result<T, SourceError>,
) -> Result<T, SourceError> {
    let mut retry_count = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if policy.should_retry(&err, retry_count) => {
                let delay = policy.delay_for(&err, retry_count);
                warn!(
                    "{} failed ({}), retry {}/{} in {:?}",
                    label,
                    err,
                    retry_count + 1,
                    policy.max_retries,
                    delay
                );
                if !sleep_unless_cancelled(delay, cancel) {
                    return Err(err);
                }
                retry_count += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_default_matches_settings() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff_ms(0), 2000);
        assert_eq!(policy.backoff_ms(1), 4000);
        assert_eq!(policy.backoff_ms(2), 8000);
        assert_eq!(policy.backoff_ms(5), 8000);
    }

    #[test]
    fn test_rate_limit_cooldown_wins_when_longer() {
        let policy = RetryPolicy::default();
        let limited = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(policy.delay_for(&limited, 0), Duration::from_secs(30));
        let short = SourceError::RateLimited {
            retry_after: Some(Duration::from_millis(10)),
        };
        assert_eq!(policy.delay_for(&short, 0), Duration::from_millis(2000));
    }

    #[test]
    fn test_should_retry() {
        let policy = fast_policy(2);
        let unreachable = SourceError::SourceUnreachable("timeout".into());
        assert!(policy.should_retry(&unreachable, 0));
        assert!(policy.should_retry(&unreachable, 1));
        assert!(!policy.should_retry(&unreachable, 2));
        assert!(!policy.should_retry(&SourceError::malformed("k", "bad"), 0));
    }

    #[test]
    fn test_with_retry_recovers() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast_policy(3), &CancellationToken::new(), "op", || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                Err(SourceError::SourceUnreachable("down".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_with_retry_gives_up() {
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(2), &CancellationToken::new(), "op", || {
            attempts.set(attempts.get() + 1);
            Err(SourceError::RateLimited { retry_after: None })
        });
        assert!(matches!(result, Err(SourceError::RateLimited { .. })));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_with_retry_does_not_retry_bad_data() {
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), &CancellationToken::new(), "op", || {
            attempts.set(attempts.get() + 1);
            Err(SourceError::malformed("k", "bad"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_cancelled_sleep_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let start = Instant::now();
        assert!(!sleep_unless_cancelled(Duration::from_secs(10), &cancel));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
