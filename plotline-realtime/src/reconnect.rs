//! Reconnection strategies for automatic reconnection
//!
//! When the WebSocket connection drops abnormally, the strategy decides how
//! long to wait before the next attempt and when to give up.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: `base * decay^(attempt - 1)`, capped (default)
//! - **FixedDelay**: constant delay between attempts
//! - **NoReconnect**: give up immediately
//!
//! Attempts are numbered from 1. A strategy is reset after every successful
//! connection.
//!
//! # Examples
//!
//! ```rust
//! use plotline_realtime::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! // Default: 1s growing by 1.5x up to 30s, 10 attempts
//! let mut backoff = ExponentialBackoff::default();
//! assert_eq!(backoff.next_delay(1), Some(Duration::from_millis(1000)));
//! assert_eq!(backoff.next_delay(2), Some(Duration::from_millis(1500)));
//! assert_eq!(backoff.next_delay(11), None);
//! ```

use std::time::Duration;

/// Trait for reconnection strategies
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before reconnection attempt `attempt` (1-based), or `None` to give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Reset any accumulated state after a successful connection
    fn reset(&mut self);
}

/// Exponential backoff with a configurable growth factor and optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    decay: f64,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
    current_attempt: u32,
}

impl ExponentialBackoff {
    /// Doubling backoff starting at `base_delay`, capped at `max_delay`
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            decay: 2.0,
            max_delay,
            max_attempts: None,
            jitter: false,
            current_attempt: 0,
        }
    }

    /// Growth factor between consecutive delays; values below 1 are treated as 1
    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay = decay.max(1.0);
        self
    }

    /// Set the maximum number of attempts before giving up
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Retry forever
    pub fn unlimited(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Add up to 25% random delay so clients do not reconnect in lockstep
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_secs(30))
            .with_decay(1.5)
            .with_max_attempts(10)
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        self.current_attempt = attempt;

        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }

        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let scaled = self.base_delay.as_millis() as f64 * self.decay.powi(exponent);
        let delay = scaled.min(self.max_delay.as_millis() as f64).round() as u64;

        let mut final_delay = Duration::from_millis(delay);

        if self.jitter {
            use rand::Rng;
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay / 4));
            final_delay = Duration::from_millis(delay + jitter_ms);
        }

        Some(final_delay)
    }

    fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Fixed delay reconnection strategy
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Set the maximum number of attempts before giving up
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        Some(self.delay)
    }

    fn reset(&mut self) {}
}

/// Strategy that never reconnects
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectionStrategy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {}
}
