//! Builder for [`RequestClient`]
//!
//! Every setting has a default, so `RequestClient::builder().build()` gives
//! a working client. Settings can also come from a deserialized
//! [`RequestClientConfig`], with durations written in milliseconds:
//!
//! ```rust
//! use plotline_http::{RequestClientBuilder, RequestClientConfig};
//! use std::time::Duration;
//!
//! let config: RequestClientConfig = serde_json::from_str(r#"{
//!     "base_url": "https://api.example.com/v1",
//!     "timeout": 10000,
//!     "retry": {"max_attempts": 5, "base_delay": 500},
//!     "circuit_breaker": {"failure_threshold": 3}
//! }"#).unwrap();
//!
//! assert_eq!(config.timeout, Duration::from_secs(10));
//! let builder = RequestClientBuilder::from_config(config);
//! ```
//!
//! The background cache sweeper is only started when `build` runs inside
//! a tokio runtime.

use crate::cache::{CacheManager, DEFAULT_CLEANUP_INTERVAL};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::client::{ClientInner, RequestClient};
use crate::event_source::EventSourceConfig;
use crate::interceptor::{ErrorInterceptor, InterceptorChain, RequestInterceptor, ResponseInterceptor};
use crate::metrics::HttpMetrics;
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, Transport};
use plotline_core::{system_clock, Error, ObservabilityConfig, Result, SharedClock};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Deserializable client settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestClientConfig {
    /// Prefix joined onto relative request URLs
    pub base_url: Option<String>,
    /// Per-attempt timeout, in ms
    #[serde(with = "plotline_core::serde_ms")]
    pub timeout: Duration,
    /// TTL for cached reads, in ms
    #[serde(with = "plotline_core::serde_ms")]
    pub cache_ttl: Duration,
    /// Sweep interval for expired cache entries, in ms; null disables it
    #[serde(with = "plotline_core::serde_ms::option")]
    pub cleanup_interval: Option<Duration>,
    /// Cap on cached responses
    pub cache_max_entries: Option<usize>,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub event_source: EventSourceConfig,
}

impl Default for RequestClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            cleanup_interval: Some(DEFAULT_CLEANUP_INTERVAL),
            cache_max_entries: None,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            event_source: EventSourceConfig::default(),
        }
    }
}

/// Builder for configuring and creating a [`RequestClient`]
pub struct RequestClientBuilder {
    config: RequestClientConfig,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<SharedClock>,
    interceptors: InterceptorChain,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl Default for RequestClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestClientBuilder {
    pub fn new() -> Self {
        Self::from_config(RequestClientConfig::default())
    }

    /// Start from deserialized settings
    pub fn from_config(config: RequestClientConfig) -> Self {
        Self {
            config,
            transport: None,
            clock: None,
            interceptors: InterceptorChain::new(),
            observability_config: None,
            service_name: None,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    /// Replace the `reqwest` transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Time source for timeouts, backoff, TTLs and the breaker
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Timeout for calls that do not set their own
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// TTL for cached reads that do not set their own
    pub fn default_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn cache_max_entries(mut self, max_entries: usize) -> Self {
        self.config.cache_max_entries = Some(max_entries);
        self
    }

    /// Sweep interval for expired cache entries; `None` disables the sweeper
    pub fn cleanup_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn event_source(mut self, config: EventSourceConfig) -> Self {
        self.config.event_source = config;
        self
    }

    pub fn with_request_interceptor<I: RequestInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.add_request(interceptor);
        self
    }

    pub fn with_response_interceptor<I: ResponseInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.add_response(interceptor);
        self
    }

    pub fn with_error_interceptor<I: ErrorInterceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.add_error(interceptor);
        self
    }

    /// Replace all interceptors with a prepared chain
    pub fn with_interceptor_chain(mut self, chain: InterceptorChain) -> Self {
        self.interceptors = chain;
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Fails when observability is enabled and cannot be initialized.
    pub fn build(self) -> Result<RequestClient> {
        let metrics = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }
                plotline_core::init_observability(config.clone()).map_err(|e| {
                    Error::Internal(format!("Failed to initialize observability: {}", e))
                })?;
                Some(Arc::new(HttpMetrics::new(config.service_name)))
            }
            None => None,
        };

        let config = self.config;
        let clock = self.clock.unwrap_or_else(system_clock);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new()));

        let mut cache = CacheManager::with_clock(clock.clone());
        if let Some(max_entries) = config.cache_max_entries {
            cache = cache.with_max_entries(max_entries);
        }

        let sweeper = match config.cleanup_interval {
            Some(interval) if tokio::runtime::Handle::try_current().is_ok() => {
                Some(cache.spawn_cleanup(interval))
            }
            Some(_) => {
                tracing::warn!("No tokio runtime available, cache cleanup disabled");
                None
            }
            None => None,
        };

        tracing::debug!(
            base_url = config.base_url.as_deref().unwrap_or(""),
            timeout_ms = config.timeout.as_millis() as u64,
            max_attempts = config.retry.max_attempts,
            "Request client configured"
        );

        Ok(RequestClient::from_inner(ClientInner {
            base_url: config.base_url,
            transport,
            cache,
            breaker: CircuitBreaker::with_clock(config.circuit_breaker, clock.clone()),
            interceptors: self.interceptors,
            retry: config.retry,
            default_timeout: config.timeout,
            default_cache_ttl: config.cache_ttl,
            event_source: config.event_source,
            clock,
            metrics,
            inflight: Mutex::new(HashMap::new()),
            sweeper,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: RequestClientConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RequestClientConfig::default());
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.cleanup_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_config_from_json() {
        let config: RequestClientConfig = serde_json::from_str(
            r#"{
                "base_url": "https://api.test",
                "cache_ttl": 1000,
                "cleanup_interval": null,
                "retry": {"max_attempts": 5},
                "circuit_breaker": {"reset_timeout": 2000}
            }"#,
        )
        .unwrap();

        assert_eq!(config.base_url.as_deref(), Some("https://api.test"));
        assert_eq!(config.cache_ttl, Duration::from_secs(1));
        assert_eq!(config.cleanup_interval, None);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(2));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_build_outside_runtime_skips_sweeper() {
        let client = RequestClientBuilder::new().build().unwrap();
        assert!(!client.is_sweeping());
    }

    #[tokio::test]
    async fn test_build_inside_runtime_starts_sweeper() {
        let client = RequestClientBuilder::new().build().unwrap();
        assert!(client.is_sweeping());

        let client = RequestClientBuilder::new().cleanup_interval(None).build().unwrap();
        assert!(!client.is_sweeping());
    }
}
