//! Retry policy for failed dispatches.

use caseflow_core::config::SchedulerConfig;
use chrono::Duration;

/// Exponential backoff for notification retries.
///
/// The delay is `min(base * 2^retry_count, max)`, with `retry_count` read
/// before the failure that triggers the retry is counted. [`RetryPolicy::backoff`]
/// takes the count after it (N = retry_count + 1), hence `2^(N-1)` there.
/// `max_attempts` is stamped onto new notifications; each notification carries
/// its own bound from then on.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::seconds(60),
            max_delay: Duration::seconds(3600),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::seconds(config.backoff_base_secs as i64),
            max_delay: Duration::seconds(config.backoff_max_secs as i64),
        }
    }

    /// Delay after the `attempt`-th consecutive failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2i32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.checked_mul(multiplier).unwrap_or(self.max_delay);
        delay.min(self.max_delay)
    }
}
