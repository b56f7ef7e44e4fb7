//! Retry policy for port acquisition.
//!
//! # Responsibilities
//! - Bound the number of acquisition attempts
//! - Supply the wait between attempts
//! - Decide whether a bind failure is worth another attempt
//!
//! # Design Decisions
//! - Fixed delay between attempts, no exponential growth
//! - No jitter: one controller per port

use std::time::Duration;

use crate::config::AcquisitionConfig;
use crate::net::BindError;

/// Attempt limit and fixed inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &AcquisitionConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before the attempt following `attempt`. Constant.
    pub fn delay_after(&self, _attempt: u32) -> Duration {
        self.delay
    }

    /// Whether attempt `attempt` (1-based) that failed with `error` should be followed by another.
    pub fn should_retry(&self, attempt: u32, error: &BindError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}
