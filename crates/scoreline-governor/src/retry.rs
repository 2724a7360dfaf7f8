//! Bounded exponential backoff.

use std::time::Duration;

use scoreline_core::GovernorConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.backoff_base_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt.min(30) as i32);
        let delay = self.initial_backoff.as_secs_f64() * multiplier;
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }

    pub fn is_exhausted(&self, retries_done: u32) -> bool {
        retries_done >= self.max_retries
    }
}
