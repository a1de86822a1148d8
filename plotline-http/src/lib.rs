//! Resilient HTTP client for the plotline studio backend
//!
//! This crate wraps a plain HTTP transport in the protections a
//! long-running UI needs when the backend is slow, flaky or briefly down.
//!
//! # Core Features
//!
//! - **Response Cache**: TTL cache for reads with glob/substring invalidation
//! - **Circuit Breaker**: fails fast after repeated failures, then tests recovery
//! - **Retries**: exponential backoff for network errors, timeouts and 5xx
//! - **Deduplication**: identical concurrent calls share one request
//! - **Interceptors**: request, response and error hooks
//! - **Typed Errors**: every failure is an [`ApiError`] with a kind and status
//! - **Server-Sent Events**: reconnecting `text/event-stream` reader
//! - **Observability**: OpenTelemetry metrics and tracing spans
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use plotline_http::{interceptor::BearerAuth, CircuitBreakerConfig, RequestClient, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RequestClient::builder()
//!         .base_url("https://api.example.com/v1")
//!         .default_timeout(Duration::from_secs(10))
//!         .retry_policy(RetryPolicy::new(4, Duration::from_millis(500)))
//!         .circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(3))
//!         .with_request_interceptor(BearerAuth::token("secret"))
//!         .build()?;
//!
//!     let projects: Vec<serde_json::Value> = client.get("/projects").await?.json()?;
//!     println!("{} projects", projects.len());
//!     Ok(())
//! }
//! ```
//!
//! [`ApiError`]: plotline_core::ApiError

mod cache;
mod circuit_breaker;
mod client;
mod client_builder;
mod event_source;
pub mod interceptor;
mod metrics;
mod retry;
mod transport;

pub use cache::{CacheEntry, CacheManager, CleanupTask, DEFAULT_CLEANUP_INTERVAL};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use client::RequestClient;
pub use client_builder::{RequestClientBuilder, RequestClientConfig, DEFAULT_CACHE_TTL, DEFAULT_TIMEOUT};
pub use event_source::{EventSource, EventSourceConfig, EventSourceState, ServerEvent, SseParser};
pub use interceptor::{
    BearerAuth, DefaultHeaders, ErrorInterceptor, InterceptorChain, LoggingInterceptor,
    RequestInterceptor, ResponseInterceptor,
};
pub use metrics::HttpMetrics;
pub use retry::{RetryDecision, RetryPolicy};
pub use transport::{resolve_url, HttpTransport, StreamingResponse, Transport, TransportResponse};

pub use plotline_core::{ApiError, ApiErrorKind, ApiResponse, ApiResult, RequestDescriptor};
