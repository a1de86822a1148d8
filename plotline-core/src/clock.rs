//! Injectable time source
//!
//! Every component that waits or measures time (cache expiry, circuit breaker
//! reset, retry backoff, request timeouts, heartbeats, reconnect delays) reads
//! it through a [`Clock`], so tests can drive time deterministically.
//!
//! - [`TokioClock`]: backed by `tokio::time`; honours `tokio::time::pause()`
//!   and `#[tokio::test(start_paused = true)]`
//! - [`ManualClock`]: only moves when [`ManualClock::advance`] is called

use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Time source
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic instant
    fn now(&self) -> Instant;

    /// Future that resolves once `duration` has elapsed on this clock
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Default clock handle
pub fn system_clock() -> SharedClock {
    Arc::new(TokioClock)
}

/// Clock backed by `tokio::time`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Clock that only advances when told to
///
/// Pending sleeps resolve during the [`advance`](ManualClock::advance) call
/// that moves time past their deadline.
///
/// # Examples
///
/// ```rust
/// use plotline_core::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now() - start, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    origin: Instant,
    elapsed: Duration,
    sleepers: Vec<(Duration, oneshot::Sender<()>)>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                origin: Instant::now(),
                elapsed: Duration::ZERO,
                sleepers: Vec::new(),
            })),
        }
    }

    /// Move time forward and wake every sleeper whose deadline has passed
    pub fn advance(&self, by: Duration) {
        let due = {
            let mut state = self.lock();
            state.elapsed += by;
            let now = state.elapsed;
            let (due, pending): (Vec<_>, Vec<_>) = state
                .sleepers
                .drain(..)
                .partition(|(deadline, _)| *deadline <= now);
            state.sleepers = pending;
            due
        };

        for (_, waker) in due {
            let _ = waker.send(());
        }
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Number of sleeps not yet resolved
    pub fn pending_sleepers(&self) -> usize {
        self.lock().sleepers.len()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.lock();
        state.origin + state.elapsed
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        if duration.is_zero() {
            return Box::pin(async {});
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            let deadline = state.elapsed + duration;
            state.sleepers.push((deadline, tx));
        }
        Box::pin(async move {
            let _ = rx.await;
        })
    }
}
