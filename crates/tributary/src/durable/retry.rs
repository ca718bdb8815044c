//! Activity bounds and retry policy.

use std::time::Duration;

/// Default bound on a single activity attempt.
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// How often a failed or timed-out activity is attempted.
///
/// Backoff before attempt `n + 1` is `initial_backoff * 2^(n - 1)`, capped at
/// `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` means single-shot.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub const fn single_shot() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_shot()
    }
}

/// Bounds applied to every local activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityOptions {
    /// Bound on a single attempt.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ActivityOptions {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_TIMEOUT, RetryPolicy::single_shot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn defaults_are_single_shot_ten_seconds() {
        let options = ActivityOptions::default();
        assert_eq!(options.retry.max_attempts, 1);
        assert_eq!(options.timeout, Duration::from_secs(10));
    }
}
