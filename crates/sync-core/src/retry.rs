//! Retry policy for the HTTP clients.
//!
//! Transient remote failures (transport errors, 429, 5xx) are retried at the
//! client layer only; the reconciliation core never retries on its own.

use std::time::Duration;

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (0 disables retries).
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_backoff_ms: u64,

    /// Upper bound for any single delay in milliseconds.
    pub max_backoff_ms: u64,

    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with the given retry budget and default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// No retries at all.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Set the initial backoff.
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set the maximum backoff.
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether an HTTP status is worth retrying.
    pub fn should_retry(&self, status_code: u16) -> bool {
        status_code == 429 || (500..=599).contains(&status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig::new(5)
            .with_initial_backoff(100)
            .with_max_backoff(350);
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(350));
        assert_eq!(retry.backoff(10), Duration::from_millis(350));
    }

    #[test]
    fn test_should_retry_statuses() {
        let retry = RetryConfig::default();
        assert!(retry.should_retry(429));
        assert!(retry.should_retry(502));
        assert!(!retry.should_retry(400));
        assert!(!retry.should_retry(409));
    }
}
