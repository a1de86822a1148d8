//! TTL response cache
//!
//! [`CacheManager`] maps string keys to values with a per-entry time-to-live.
//! The request client stores successful GET responses here, keyed by method,
//! URL and body.
//!
//! # Expiry
//!
//! An entry is valid while `now - inserted_at < ttl`. Expired entries are
//! dropped lazily when read and eagerly by [`CacheManager::cleanup`], which
//! a background sweeper started with [`CacheManager::spawn_cleanup`] runs on
//! an interval (60 seconds by default).
//!
//! # Pattern Invalidation
//!
//! [`CacheManager::invalidate_pattern`] accepts a glob (`*`, `?`, `[...]`)
//! matched against the whole key. A pattern without glob metacharacters
//! matches any key containing it, so `"/projects/42"` drops every cached
//! call touching that project.
//!
//! # Examples
//!
//! ```rust
//! use plotline_http::CacheManager;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache: CacheManager<String> = CacheManager::new();
//! cache.set("GET:/graph/metrics:", "cached".to_string(), Duration::from_secs(60)).await;
//! assert_eq!(cache.get("GET:/graph/metrics:").await.as_deref(), Some("cached"));
//!
//! cache.invalidate_pattern("*/graph/*").await.unwrap();
//! assert!(cache.get("GET:/graph/metrics:").await.is_none());
//! # }
//! ```

use plotline_core::{system_clock, Error, Result, SharedClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Default interval of the background sweeper
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// One cached value
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Whether the entry is still fresh at `now`
    pub fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

/// Key/value cache with per-entry TTL
///
/// Cloning is cheap and clones share the same storage.
#[derive(Debug)]
pub struct CacheManager<V> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    clock: SharedClock,
    max_entries: Option<usize>,
}

impl<V> Clone for CacheManager<V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            clock: self.clock.clone(),
            max_entries: self.max_entries,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> CacheManager<V> {
    /// Unbounded cache on the tokio clock
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Unbounded cache on a custom clock
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            max_entries: None,
        }
    }

    /// Bound the number of entries; inserting past the bound evicts expired
    /// entries first and then the oldest one
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    /// Fresh value for `key`, dropping it if it has expired
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_valid(now) => return Some(entry.data.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            // Re-check: a writer may have refreshed the entry in between
            if entry.is_valid(now) {
                return Some(entry.data.clone());
            }
            entries.remove(key);
            tracing::trace!(key = %key, "Expired cache entry evicted on read");
        }
        None
    }

    /// Store `data` under `key` for `ttl`, replacing any previous entry
    pub async fn set(&self, key: impl Into<String>, data: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        if let Some(max) = self.max_entries {
            if !entries.contains_key(&key) && entries.len() >= max {
                entries.retain(|_, entry| entry.is_valid(now));
                if entries.len() >= max {
                    let oldest = entries
                        .iter()
                        .min_by_key(|(_, entry)| entry.inserted_at)
                        .map(|(key, _)| key.clone());
                    if let Some(oldest) = oldest {
                        entries.remove(&oldest);
                        tracing::debug!(key = %oldest, "Cache full, evicted oldest entry");
                    }
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                data,
                inserted_at: now,
                ttl,
            },
        );
    }

    /// Drop one key; returns whether it was present
    pub async fn invalidate(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drop every key matching `pattern`; returns how many were removed
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRequest` for a malformed glob.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let matcher = KeyMatcher::parse(pattern)?;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !matcher.matches(key));
        let removed = before - entries.len();

        tracing::debug!(pattern = %pattern, removed, "Invalidated cache entries");
        Ok(removed)
    }

    /// Drop everything
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries, expired ones included until swept
    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Remove every expired entry; returns how many were removed
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        before - entries.len()
    }

    /// Start a background task that calls [`cleanup`](Self::cleanup) every
    /// `interval` until the returned handle is stopped or dropped
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_cleanup(&self, interval: Duration) -> CleanupTask {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cache = self.clone();
        let handle = tokio::spawn(run_cleanup_task(cache, interval, shutdown_rx));
        CleanupTask {
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for CacheManager<V> {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_cleanup_task<V: Clone + Send + Sync + 'static>(
    cache: CacheManager<V>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!(
        interval_ms = interval.as_millis() as u64,
        "Starting cache cleanup task"
    );

    loop {
        tokio::select! {
            _ = cache.clock.sleep(interval) => {
                let removed = cache.cleanup().await;
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired cache entries");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::debug!("Cache cleanup task shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle to the background sweeper; stops it when dropped
#[derive(Debug)]
pub struct CleanupTask {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl CleanupTask {
    /// Stop the sweeper and wait for it to exit
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the sweeper is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for CleanupTask {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

enum KeyMatcher {
    Glob(glob::Pattern),
    Contains(String),
}

impl KeyMatcher {
    fn parse(pattern: &str) -> Result<Self> {
        if pattern.contains(['*', '?', '[']) {
            glob::Pattern::new(pattern)
                .map(KeyMatcher::Glob)
                .map_err(|e| Error::InvalidRequest(format!("invalid cache pattern {pattern:?}: {e}")))
        } else {
            Ok(KeyMatcher::Contains(pattern.to_string()))
        }
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            KeyMatcher::Glob(pattern) => pattern.matches(key),
            KeyMatcher::Contains(fragment) => key.contains(fragment.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotline_core::ManualClock;

    fn manual_cache() -> (CacheManager<String>, ManualClock) {
        let clock = ManualClock::new();
        (CacheManager::with_clock(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_get_before_and_after_ttl() {
        let (cache, clock) = manual_cache();
        cache.set("k", "v".to_string(), Duration::from_secs(10)).await;

        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn test_set_replaces_and_refreshes() {
        let (cache, clock) = manual_cache();
        cache.set("k", "old".to_string(), Duration::from_secs(5)).await;
        clock.advance(Duration::from_secs(4));
        cache.set("k", "new".to_string(), Duration::from_secs(5)).await;
        clock.advance(Duration::from_secs(4));

        assert_eq!(cache.get("k").await.as_deref(), Some("new"));
        assert_eq!(cache.size().await, 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_never_served() {
        let (cache, _clock) = manual_cache();
        cache.set("k", "v".to_string(), Duration::ZERO).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_single_key() {
        let (cache, _clock) = manual_cache();
        cache.set("a", "1".to_string(), Duration::from_secs(60)).await;
        assert!(cache.invalidate("a").await);
        assert!(!cache.invalidate("a").await);
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_pattern_glob_and_substring() {
        let (cache, _clock) = manual_cache();
        let ttl = Duration::from_secs(60);
        cache.set("GET:https://api.test/projects/1:", "p1".to_string(), ttl).await;
        cache.set("GET:https://api.test/projects/2:", "p2".to_string(), ttl).await;
        cache.set("GET:https://api.test/graph/metrics:", "g".to_string(), ttl).await;

        let removed = cache.invalidate_pattern("GET:*/projects/*").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.size().await, 1);

        let removed = cache.invalidate_pattern("/graph/").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_glob_is_rejected() {
        let (cache, _clock) = manual_cache();
        let result = cache.invalidate_pattern("[unclosed").await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let (cache, clock) = manual_cache();
        cache.set("short", "s".to_string(), Duration::from_secs(1)).await;
        cache.set("long", "l".to_string(), Duration::from_secs(100)).await;

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.size().await, 2);
        assert_eq!(cache.cleanup().await, 1);
        assert_eq!(cache.size().await, 1);
        assert_eq!(cache.get("long").await.as_deref(), Some("l"));
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, _clock) = manual_cache();
        cache.set("a", "1".to_string(), Duration::from_secs(60)).await;
        cache.set("b", "2".to_string(), Duration::from_secs(60)).await;
        cache.clear().await;
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn test_max_entries_evicts_oldest() {
        let (cache, clock) = manual_cache();
        let cache = cache.with_max_entries(2);
        cache.set("first", "1".to_string(), Duration::from_secs(60)).await;
        clock.advance(Duration::from_millis(10));
        cache.set("second", "2".to_string(), Duration::from_secs(60)).await;
        clock.advance(Duration::from_millis(10));
        cache.set("third", "3".to_string(), Duration::from_secs(60)).await;

        assert_eq!(cache.size().await, 2);
        assert!(cache.get("first").await.is_none());
        assert!(cache.get("third").await.is_some());
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let (cache, _clock) = manual_cache();
        let other = cache.clone();
        cache.set("k", "v".to_string(), Duration::from_secs(60)).await;
        assert_eq!(other.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_cleanup_sweeps_expired_entries() {
        let cache: CacheManager<String> = CacheManager::new();
        cache.set("k", "v".to_string(), Duration::from_secs(5)).await;

        let task = cache.spawn_cleanup(Duration::from_secs(10));
        assert!(task.is_running());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.size().await, 0);

        task.stop().await;
    }
}
