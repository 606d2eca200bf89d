/// Retry policy for ledger submissions
use crate::config::PublicationConfig;
use std::time::Duration;

/// Exponential backoff with a bounded number of attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total submission attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// How long to wait for the ledger outcome after a successful submission
    pub confirmation_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            confirmation_timeout: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(delay)
    }
}

impl From<&PublicationConfig> for RetryPolicy {
    fn from(config: &PublicationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
        }
    }
}
