//! Connection state management
//!
//! Tracks the WebSocket connection lifecycle, notifies presence listeners and
//! coordinates reconnection attempts with the configured strategy.
//!
//! # Connection States
//!
//! - **Disconnected**: not connected and not trying to be
//! - **Reconnecting**: a handshake is in progress or scheduled
//! - **Connected**: the socket is open
//!
//! # State Transitions
//!
//! ```text
//!               connect()
//! Disconnected ──────────→ Reconnecting ──handshake──→ Connected
//!      ↑                     ↑      │                      │
//!      │    gave up / closed │      └──────────────────────┤ abnormal close
//!      └─────────────────────┴─────────────────────────────┘ normal / manual close
//! ```

use crate::reconnect::ReconnectionStrategy;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Reconnecting,
    Connected,
}

impl ConnectionState {
    /// Gauge value used by the metrics (0=disconnected, 1=reconnecting, 2=connected)
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Reconnecting => 1,
            ConnectionState::Connected => 2,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Callback invoked on every state change
pub type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Manages connection state and reconnection logic
pub struct ConnectionManager {
    state: watch::Sender<ConnectionState>,
    strategy: Mutex<Box<dyn ReconnectionStrategy>>,
    attempt: AtomicU32,
    listeners: Mutex<BTreeMap<u64, StateListener>>,
    next_listener: AtomicU64,
}

impl ConnectionManager {
    pub fn new(strategy: Box<dyn ReconnectionStrategy>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            strategy: Mutex::new(strategy),
            attempt: AtomicU32::new(0),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Change the state, notifying listeners if it actually changed
    ///
    /// Returns whether the state changed.
    pub fn set_state(&self, new_state: ConnectionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == new_state {
                false
            } else {
                *state = new_state;
                true
            }
        });

        if changed {
            tracing::debug!(state = %new_state, "Connection state changed");
            let listeners: Vec<StateListener> = lock(&self.listeners).values().cloned().collect();
            for listener in listeners {
                listener(new_state);
            }
        }
        changed
    }

    /// Mark the connection open and reset the reconnection schedule
    pub fn connected(&self) {
        self.attempt.store(0, Ordering::SeqCst);
        lock(&self.strategy).reset();
        self.set_state(ConnectionState::Connected);
    }

    /// Attempt number and delay for the next reconnection
    ///
    /// Returns `None` when the strategy gives up; the attempt counter then
    /// holds the number of attempts that were made.
    pub fn next_reconnect_delay(&self) -> Option<(u32, Duration)> {
        let attempt = self.attempt.load(Ordering::SeqCst) + 1;
        let delay = lock(&self.strategy).next_delay(attempt)?;
        self.attempt.store(attempt, Ordering::SeqCst);
        Some((attempt, delay))
    }

    /// Reconnection attempts made since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Start over with a fresh reconnection schedule
    pub fn reset_attempts(&self) {
        self.attempt.store(0, Ordering::SeqCst);
        lock(&self.strategy).reset();
    }

    pub fn add_listener(&self, listener: StateListener) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).insert(id, listener);
        id
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        lock(&self.listeners).remove(&id).is_some()
    }
}

pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::{ExponentialBackoff, FixedDelay};

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Box::new(
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10)).with_max_attempts(3),
        ))
    }

    #[test]
    fn test_connection_state_transitions() {
        let manager = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        assert!(manager.set_state(ConnectionState::Reconnecting));
        assert!(!manager.set_state(ConnectionState::Reconnecting));
        manager.connected();
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_reconnection_attempts() {
        let manager = manager();

        assert_eq!(manager.next_reconnect_delay(), Some((1, Duration::from_millis(100))));
        assert_eq!(manager.next_reconnect_delay(), Some((2, Duration::from_millis(200))));
        assert_eq!(manager.next_reconnect_delay(), Some((3, Duration::from_millis(400))));
        assert_eq!(manager.next_reconnect_delay(), None);
        assert_eq!(manager.attempts(), 3);
    }

    #[test]
    fn test_strategy_reset_on_connect() {
        let manager = ConnectionManager::new(Box::new(FixedDelay::new(Duration::from_secs(1)).with_max_attempts(1)));

        assert!(manager.next_reconnect_delay().is_some());
        assert!(manager.next_reconnect_delay().is_none());

        manager.connected();
        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.next_reconnect_delay(), Some((1, Duration::from_secs(1))));
    }

    #[test]
    fn test_listeners_see_changes_only() {
        let manager = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let recorder = seen.clone();
        let id = manager.add_listener(Arc::new(move |state: ConnectionState| recorder.lock().unwrap().push(state)));

        manager.set_state(ConnectionState::Reconnecting);
        manager.set_state(ConnectionState::Reconnecting);
        manager.connected();
        assert!(manager.remove_listener(id));
        manager.set_state(ConnectionState::Disconnected);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionState::Reconnecting, ConnectionState::Connected]
        );
    }

    #[tokio::test]
    async fn test_watch_observes_state() {
        let manager = manager();
        let mut receiver = manager.watch();

        manager.set_state(ConnectionState::Reconnecting);
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow(), ConnectionState::Reconnecting);
    }
}
