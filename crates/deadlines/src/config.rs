//! Scheduler configuration.

use std::time::Duration;

/// Delivery tuning for [`DeadlineScheduler`](crate::DeadlineScheduler).
///
/// Reads from environment variables:
/// - `DEADLINE_MAX_ATTEMPTS` — delivery attempts before a deadline is dropped (default: `5`)
/// - `DEADLINE_RETRY_BASE_MS` — first retry delay in milliseconds (default: `200`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_delivery_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl SchedulerConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_delivery_attempts: std::env::var("DEADLINE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_delivery_attempts),
            retry_base_delay: std::env::var("DEADLINE_RETRY_BASE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: defaults.retry_max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based): doubles from the base
    /// delay and is capped at the max delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(30),
        }
    }
}
