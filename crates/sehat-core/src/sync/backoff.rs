//! Retry ceiling and exponential backoff

use std::time::Duration;

/// Retry ceiling: retries allowed after the first failed attempt.
const DEFAULT_RETRY_CEILING: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// When to retry a failed delivery and when to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// An action is abandoned once its attempts exceed this value
    pub retry_ceiling: u32,
    /// Delay after the first failure; doubles per further failure
    pub base_delay: Duration,
    /// Upper bound for the delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_ceiling: DEFAULT_RETRY_CEILING,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt, given the attempts made so far (>= 1).
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Whether an action with this many attempts must be abandoned.
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        attempts > self.retry_ceiling
    }
}
