use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimum spacing between requests to one upstream, shared by every worker
/// thread using the same client.
pub struct RequestSpacing {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestSpacing {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    /// Block until the next request may be sent.
    pub fn wait(&self) {
        let mut last = self
            .last_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_is_immediate_then_spaced() {
        let spacing = RequestSpacing::new(Duration::from_millis(50));
        let start = Instant::now();
        spacing.wait();
        assert!(start.elapsed() < Duration::from_millis(50));
        spacing.wait();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
