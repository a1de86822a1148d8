//! Circuit breaker
//!
//! Stops sending requests to a server that keeps failing, then tests it
//! with a limited number of trial calls before resuming normal traffic.
//!
//! # States
//!
//! - **Closed**: requests flow; consecutive failures are counted and a
//!   success resets the count. Reaching `failure_threshold` opens the circuit.
//! - **Open**: requests are rejected until `reset_timeout` has passed, after
//!   which the next [`CircuitBreaker::can_execute`] moves to half-open.
//! - **HalfOpen**: up to `half_open_max_calls` trial requests are admitted.
//!   That many successes close the circuit; any failure reopens it with a
//!   fresh `reset_timeout`.
//!
//! A call admitted through [`CircuitBreaker::acquire`] holds a
//! [`CallPermit`]. A permit dropped without an outcome (a cancelled caller,
//! an error the breaker does not count) gives its half-open slot back, so
//! the circuit cannot get stuck half-open.
//!
//! Only failures the request client considers retryable (network errors,
//! timeouts, 5xx) are recorded, so a stream of 404s never opens the circuit.

use plotline_core::{system_clock, SharedClock};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding used by the state gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing, in milliseconds
    #[serde(with = "plotline_core::serde_ms")]
    pub reset_timeout: Duration,
    /// Trial calls admitted while half-open, and successes needed to close
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }
}

/// Point-in-time view of the breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Time left before an open circuit admits a trial request
    pub retry_in: Option<Duration>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    next_attempt: Option<Instant>,
    /// Bumped on every state change so stale permits cannot touch a newer window
    generation: u64,
}

impl BreakerState {
    fn closed(generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            next_attempt: None,
            generation,
        }
    }
}

/// Three-state circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerState::closed(0)),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask to send one request
    ///
    /// Admitting a call while half-open consumes one of the trial slots, and
    /// the slot stays taken until an outcome is recorded. Prefer
    /// [`acquire`](Self::acquire), which hands the slot back if the call
    /// ends without one.
    pub async fn can_execute(&self) -> bool {
        self.admit().is_some()
    }

    /// Whether a call would currently be admitted, without taking a slot
    pub async fn allows_requests(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .next_attempt
                .map(|at| self.clock.now() >= at)
                .unwrap_or(true),
            CircuitState::HalfOpen => inner.half_open_calls < self.config.half_open_max_calls.max(1),
        }
    }

    /// Admit one call, returning a permit that reports its outcome
    ///
    /// Dropping the permit without reporting releases its half-open slot.
    pub async fn acquire(&self) -> Option<CallPermit<'_>> {
        let (generation, trial) = self.admit()?;
        Some(CallPermit {
            breaker: self,
            generation,
            trial,
            settled: false,
        })
    }

    /// Returns the generation and whether a half-open slot was taken
    fn admit(&self) -> Option<(u64, bool)> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some((inner.generation, false)),
            CircuitState::Open => {
                let now = self.clock.now();
                let ready = inner.next_attempt.map(|at| now >= at).unwrap_or(true);
                if !ready {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.half_open_calls = 1;
                inner.generation += 1;
                tracing::info!("Circuit breaker half-open, admitting trial request");
                Some((inner.generation, true))
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls.max(1) {
                    inner.half_open_calls += 1;
                    Some((inner.generation, true))
                } else {
                    None
                }
            }
        }
    }

    fn release(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.generation == generation {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
            tracing::debug!("Trial request ended without an outcome, slot released");
        }
    }

    /// Report a successful call
    pub async fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_max_calls.max(1) {
                    let generation = inner.generation + 1;
                    *inner = BreakerState::closed(generation);
                    tracing::info!("Circuit breaker closed after successful trial requests");
                }
            }
            // A call admitted before the circuit opened finished late
            CircuitState::Open => {}
        }
    }

    /// Report a failed call
    pub async fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold.max(1) {
                    self.trip(&mut inner);
                    tracing::warn!(
                        failures = inner.failure_count,
                        reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                self.trip(&mut inner);
                tracing::warn!("Trial request failed, circuit breaker reopened");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, without side effects
    pub async fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub async fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        let now = self.clock.now();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            retry_in: match inner.state {
                CircuitState::Open => inner
                    .next_attempt
                    .map(|at| at.saturating_duration_since(now)),
                _ => None,
            },
        }
    }

    /// Force the breaker back to closed
    pub async fn reset(&self) {
        let mut inner = self.lock();
        let generation = inner.generation + 1;
        *inner = BreakerState::closed(generation);
        tracing::info!("Circuit breaker reset");
    }

    fn trip(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.half_open_calls = 0;
        inner.generation += 1;
        inner.next_attempt = Some(self.clock.now() + self.config.reset_timeout);
    }
}

/// Admission to make one call through a [`CircuitBreaker`]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    pub async fn record_success(mut self) {
        self.settled = true;
        self.breaker.record_success().await;
    }

    pub async fn record_failure(mut self) {
        self.settled = true;
        self.breaker.record_failure().await;
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotline_core::ManualClock;
    use std::sync::Arc;

    fn breaker(threshold: u32, reset: Duration, trials: u32) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(threshold)
            .with_reset_timeout(reset)
            .with_half_open_max_calls(trials);
        (CircuitBreaker::with_clock(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.reset_timeout, Duration::from_secs(60));
        assert_eq!(config.half_open_max_calls, 3);
    }

    #[test]
    fn test_config_from_json() {
        let config: CircuitBreakerConfig =
            serde_json::from_value(serde_json::json!({"failure_threshold": 2, "reset_timeout": 500}))
                .unwrap();
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.reset_timeout, Duration::from_millis(500));
        assert_eq!(config.half_open_max_calls, 3);
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(10), 1);

        for _ in 0..2 {
            assert!(breaker.can_execute().await);
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.can_execute().await);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(10), 1);
        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        breaker.record_failure().await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.snapshot().await.failure_count, 2);
    }

    #[tokio::test]
    async fn test_half_open_after_reset_timeout() {
        let (breaker, clock) = breaker(1, Duration::from_secs(10), 1);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        clock.advance(Duration::from_secs(9));
        assert!(!breaker.can_execute().await);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_execute().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let (breaker, clock) = breaker(1, Duration::from_secs(10), 1);
        breaker.record_failure().await;
        clock.advance(Duration::from_secs(10));

        assert!(breaker.can_execute().await);
        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.snapshot().await.failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_with_fresh_timeout() {
        let (breaker, clock) = breaker(1, Duration::from_secs(10), 2);
        breaker.record_failure().await;
        clock.advance(Duration::from_secs(10));

        assert!(breaker.can_execute().await);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.retry_in, Some(Duration::from_secs(10)));
        assert!(!breaker.can_execute().await);
    }

    #[tokio::test]
    async fn test_half_open_limits_trial_calls() {
        let (breaker, clock) = breaker(1, Duration::from_secs(1), 2);
        breaker.record_failure().await;
        clock.advance(Duration::from_secs(1));

        assert!(breaker.can_execute().await);
        assert!(breaker.can_execute().await);
        assert!(!breaker.can_execute().await);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.can_execute().await);
    }

    #[tokio::test]
    async fn test_dropped_permit_releases_trial_slot() {
        let (breaker, clock) = breaker(1, Duration::from_secs(5), 2);
        breaker.record_failure().await;
        clock.advance(Duration::from_secs(5));

        let first = breaker.acquire().await.unwrap();
        let second = breaker.acquire().await.unwrap();
        assert!(breaker.acquire().await.is_none());
        assert!(!breaker.allows_requests().await);

        drop(first);
        drop(second);
        assert!(breaker.allows_requests().await);

        breaker.acquire().await.unwrap().record_success().await;
        breaker.acquire().await.unwrap().record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stale_permit_does_not_touch_new_window() {
        let (breaker, clock) = breaker(1, Duration::from_secs(5), 1);
        breaker.record_failure().await;
        clock.advance(Duration::from_secs(5));

        let stale = breaker.acquire().await.unwrap();
        breaker.record_failure().await;
        clock.advance(Duration::from_secs(5));
        let current = breaker.acquire().await.unwrap();

        drop(stale);
        assert!(breaker.acquire().await.is_none());
        current.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_allows_requests_does_not_consume_slots() {
        let (breaker, clock) = breaker(1, Duration::from_secs(5), 1);
        breaker.record_failure().await;
        assert!(!breaker.allows_requests().await);

        clock.advance(Duration::from_secs(5));
        assert!(breaker.allows_requests().await);
        assert!(breaker.allows_requests().await);
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(breaker.acquire().await.is_some());
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let (breaker, _clock) = breaker(1, Duration::from_secs(60), 1);
        breaker.record_failure().await;
        breaker.reset().await;
        assert!(breaker.can_execute().await);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
