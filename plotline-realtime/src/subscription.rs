//! Message type subscriptions
//!
//! Incoming envelopes are dispatched by their `type`. Every handler
//! registered for that type runs, followed by every wildcard (`*`) handler.
//! Handlers are plain synchronous closures and run on the connection's
//! driver task, so they should hand long work off to a spawned task.
//!
//! A handler that panics is logged and skipped; the remaining handlers
//! still run.
//!
//! # Examples
//!
//! ```rust
//! use plotline_core::Envelope;
//! use plotline_realtime::SubscriptionRegistry;
//! use std::sync::Arc;
//!
//! let registry = SubscriptionRegistry::new();
//! let id = registry.register("job_progress", Arc::new(|envelope: &Envelope| {
//!     println!("progress for {:?}", envelope.job_id);
//! }));
//!
//! assert_eq!(registry.dispatch(&Envelope::new("job_progress")), 1);
//! assert!(registry.unregister("job_progress", id));
//! ```

use crate::connection_state::lock;
use plotline_core::{codec, Envelope};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Callback for incoming messages
pub type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Handlers keyed by message type
#[derive(Default)]
pub struct SubscriptionRegistry {
    handlers: Mutex<HashMap<String, Vec<(u64, MessageHandler)>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`; returns the id needed to remove it
    pub fn register(&self, kind: impl Into<String>, handler: MessageHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.handlers)
            .entry(kind.into())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn unregister(&self, kind: &str, id: u64) -> bool {
        let mut handlers = lock(&self.handlers);
        let Some(list) = handlers.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(kind);
        }
        removed
    }

    /// Run the handlers for `envelope`; returns how many ran
    ///
    /// Heartbeat messages are never dispatched.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        if codec::is_heartbeat(&envelope.kind) {
            return 0;
        }

        let targets: Vec<MessageHandler> = {
            let handlers = lock(&self.handlers);
            let exact = handlers.get(&envelope.kind).into_iter().flatten();
            let wildcard = if envelope.kind == codec::WILDCARD {
                None
            } else {
                handlers.get(codec::WILDCARD)
            };
            exact
                .chain(wildcard.into_iter().flatten())
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        for handler in &targets {
            if catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
                tracing::error!(kind = %envelope.kind, "Message handler panicked");
            }
        }
        targets.len()
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: &str) -> usize {
        lock(&self.handlers).get(kind).map(Vec::len).unwrap_or(0)
    }

    /// Message types with at least one handler
    pub fn kinds(&self) -> Vec<String> {
        lock(&self.handlers).keys().cloned().collect()
    }
}

/// Handle that removes a registration when [`unsubscribe`](Subscription::unsubscribe) is called
///
/// Dropping the handle keeps the registration alive.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(dispose: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(count: &Arc<AtomicUsize>) -> MessageHandler {
        let count = count.clone();
        Arc::new(move |_: &Envelope| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_to_type_and_wildcard() {
        let registry = SubscriptionRegistry::new();
        let typed = Arc::new(AtomicUsize::new(0));
        let wildcard = Arc::new(AtomicUsize::new(0));

        registry.register("job_progress", counter(&typed));
        registry.register("job_progress", counter(&typed));
        registry.register("*", counter(&wildcard));

        assert_eq!(registry.dispatch(&Envelope::new("job_progress")), 3);
        assert_eq!(registry.dispatch(&Envelope::new("graph_updated")), 1);
        assert_eq!(typed.load(Ordering::SeqCst), 2);
        assert_eq!(wildcard.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_heartbeats_are_not_dispatched() {
        let registry = SubscriptionRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.register("*", counter(&count));
        registry.register("pong", counter(&count));

        assert_eq!(registry.dispatch(&Envelope::new("ping")), 0);
        assert_eq!(registry.dispatch(&Envelope::new("pong")), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregister() {
        let registry = SubscriptionRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = registry.register("a", counter(&count));

        assert!(registry.unregister("a", id));
        assert!(!registry.unregister("a", id));
        assert_eq!(registry.handler_count("a"), 0);
        assert!(registry.kinds().is_empty());
        assert_eq!(registry.dispatch(&Envelope::new("a")), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let registry = SubscriptionRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.register("a", Arc::new(|_: &Envelope| panic!("handler failure")));
        registry.register("a", counter(&count));

        assert_eq!(registry.dispatch(&Envelope::new("a")), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_unregister_itself() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let id = Arc::new(AtomicU64::new(0));

        let inner_registry = registry.clone();
        let inner_id = id.clone();
        let registered = registry.register(
            "once",
            Arc::new(move |_: &Envelope| {
                inner_registry.unregister("once", inner_id.load(Ordering::SeqCst));
            }),
        );
        id.store(registered, Ordering::SeqCst);

        assert_eq!(registry.dispatch(&Envelope::new("once")), 1);
        assert_eq!(registry.dispatch(&Envelope::new("once")), 0);
    }

    #[test]
    fn test_subscription_disposes_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let subscription = Subscription::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        assert!(format!("{:?}", subscription).contains("active: true"));
        subscription.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
