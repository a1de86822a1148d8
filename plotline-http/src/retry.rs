//! Retry policy with exponential backoff
//!
//! A request is attempted up to `max_attempts` times in total. After a
//! retryable failure of attempt `n` the client waits
//! `base_delay * 2^(n-1)`, capped at `max_delay`, before attempt `n + 1`:
//! with the defaults that is 1s, then 2s. Non-retryable failures (4xx,
//! circuit rejections, codec errors) end the request immediately.

use plotline_core::ApiError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then make another attempt
    Retry { delay: Duration },
    /// Surface the error
    GiveUp,
}

/// Retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds
    #[serde(with = "plotline_core::serde_ms")]
    pub base_delay: Duration,
    /// Upper bound for any single delay, in milliseconds
    #[serde(with = "plotline_core::serde_ms::option")]
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// A single attempt
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay after the failure of attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(exponent));
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Decide whether to retry after attempt `attempt` failed with `error`
    pub fn decide(&self, attempt: u32, error: &ApiError) -> RetryDecision {
        if !error.retryable || attempt >= self.max_attempts.max(1) {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.backoff(attempt),
        }
    }
}
