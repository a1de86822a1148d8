//! Resilient HTTP request client
//!
//! [`RequestClient`] runs every call through the same pipeline:
//!
//! 1. **Cache**: a fresh cached response for a cacheable read is returned
//!    immediately, marked `cached`
//! 2. **Circuit breaker**: an open circuit rejects the call with a
//!    `CircuitOpen` error (status 503) without contacting the server.
//!    Half-open trial slots are only taken by calls that reach the
//!    transport, and a call that ends without an outcome hands its slot back
//! 3. **Request interceptors**: transform the descriptor in order
//! 4. **Deduplication**: identical concurrent calls (same method, URL and
//!    body) share one in-flight request and all receive its outcome. The
//!    shared request runs on its own task and completes even if every
//!    caller is dropped
//! 5. **Attempt**: the transport call races the per-request timeout
//! 6. **Classification**: non-2xx statuses, network failures and timeouts
//!    become typed [`ApiError`]s and pass through the error interceptors
//! 7. **Retry**: retryable failures are retried with exponential backoff,
//!    re-consulting the breaker before each new attempt
//! 8. **Success**: the breaker records success, response interceptors run
//!    and successful reads are cached
//!
//! The breaker only counts failures that are retryable (network errors,
//! timeouts, 5xx). Other responses prove the server is reachable and count
//! as successes, which also lets a half-open circuit close on 4xx traffic.
//!
//! Writes never invalidate the cache on their own; call
//! [`RequestClient::invalidate_pattern`] after a mutation that affects cached
//! reads.
//!
//! # Examples
//!
//! ```rust,no_run
//! use plotline_http::RequestClient;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RequestClient::builder()
//!     .base_url("https://api.example.com/v1")
//!     .build()?;
//!
//! let metrics = client.get("/graph/metrics").await?;
//! println!("cached: {}", metrics.cached);
//!
//! client.post("/projects", &json!({"name": "draft"})).await?;
//! client.invalidate_pattern("/projects").await?;
//! # Ok(())
//! # }
//! ```

use crate::cache::{CacheManager, CleanupTask};
use crate::circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
use crate::client_builder::RequestClientBuilder;
use crate::event_source::{EventSource, EventSourceConfig};
use crate::interceptor::InterceptorChain;
use crate::metrics::HttpMetrics;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::{resolve_url, Transport};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use plotline_core::{
    ApiError, ApiErrorKind, ApiResponse, ApiResult, FormPart, Method, RequestBody,
    RequestDescriptor, ResponseBody, SharedClock,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;

type SharedResponse = Shared<BoxFuture<'static, ApiResult<ApiResponse>>>;

pub(crate) struct ClientInner {
    pub(crate) base_url: Option<String>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cache: CacheManager<ApiResponse>,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) interceptors: InterceptorChain,
    pub(crate) retry: RetryPolicy,
    pub(crate) default_timeout: Duration,
    pub(crate) default_cache_ttl: Duration,
    pub(crate) event_source: EventSourceConfig,
    pub(crate) clock: SharedClock,
    pub(crate) metrics: Option<Arc<HttpMetrics>>,
    pub(crate) inflight: Mutex<HashMap<String, SharedResponse>>,
    pub(crate) sweeper: Option<CleanupTask>,
}

/// HTTP client with caching, circuit breaking, retries, deduplication and
/// interceptors
///
/// Cloning is cheap; clones share cache, breaker and in-flight requests.
#[derive(Clone)]
pub struct RequestClient {
    inner: Arc<ClientInner>,
}

impl RequestClient {
    /// Start configuring a client
    pub fn builder() -> RequestClientBuilder {
        RequestClientBuilder::new()
    }

    pub(crate) fn from_inner(inner: ClientInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub async fn get(&self, url: &str) -> ApiResult<ApiResponse> {
        self.request(RequestDescriptor::new(Method::Get, url)).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> ApiResult<ApiResponse> {
        self.request(RequestDescriptor::new(Method::Post, url).with_json(to_json(body)?))
            .await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> ApiResult<ApiResponse> {
        self.request(RequestDescriptor::new(Method::Put, url).with_json(to_json(body)?))
            .await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> ApiResult<ApiResponse> {
        self.request(RequestDescriptor::new(Method::Patch, url).with_json(to_json(body)?))
            .await
    }

    pub async fn delete(&self, url: &str) -> ApiResult<ApiResponse> {
        self.request(RequestDescriptor::new(Method::Delete, url)).await
    }

    /// POST a multipart form
    pub async fn upload(&self, url: &str, parts: Vec<FormPart>) -> ApiResult<ApiResponse> {
        self.request(
            RequestDescriptor::new(Method::Post, url).with_body(RequestBody::Multipart(parts)),
        )
        .await
    }

    /// Run a fully described request through the pipeline
    #[tracing::instrument(
        name = "http.request",
        skip(self, descriptor),
        fields(method = %descriptor.method, url = %descriptor.url)
    )]
    pub async fn request(&self, mut descriptor: RequestDescriptor) -> ApiResult<ApiResponse> {
        descriptor.url = resolve_url(self.inner.base_url.as_deref(), &descriptor.url);
        let method = descriptor.method;
        let started = self.inner.clock.now();

        let result = self.run_pipeline(descriptor).await;

        let elapsed = self.inner.clock.now().saturating_duration_since(started);
        match &result {
            Ok(response) => {
                tracing::debug!(
                    status = response.status,
                    cached = response.cached,
                    duration_ms = elapsed.as_millis() as u64,
                    "Request completed"
                );
            }
            Err(error) => {
                tracing::warn!(
                    kind = %error.kind,
                    status = error.status,
                    error = %error,
                    duration_ms = elapsed.as_millis() as u64,
                    "Request failed"
                );
            }
        }
        if let Some(metrics) = &self.inner.metrics {
            let outcome = match &result {
                Ok(response) if response.cached => "cached",
                Ok(_) => "success",
                Err(error) => error.kind.as_str(),
            };
            metrics.record_request(method.as_str(), outcome, elapsed.as_secs_f64());
            if let Err(error) = &result {
                metrics.record_error(error.kind);
            }
        }

        result
    }

    async fn run_pipeline(&self, descriptor: RequestDescriptor) -> ApiResult<ApiResponse> {
        let inner = &self.inner;

        // Keyed on the request as the caller wrote it, before interceptors
        let key = descriptor.cache_key();
        let cache_key = descriptor.is_cacheable().then(|| key.clone());

        if let Some(cache_key) = &cache_key {
            let hit = inner.cache.get(cache_key).await;
            if let Some(metrics) = &inner.metrics {
                metrics.record_cache(hit.is_some());
            }
            if let Some(mut response) = hit {
                tracing::debug!("Serving response from cache");
                response.cached = true;
                return Ok(response);
            }
        }

        if !inner.breaker.allows_requests().await {
            let error = ApiError::circuit_open().with_request(Arc::new(descriptor));
            return Err(inner.interceptors.apply_error(error).await);
        }

        let descriptor = match inner.interceptors.apply_request(descriptor).await {
            Ok(descriptor) => Arc::new(descriptor),
            Err(error) => return Err(inner.interceptors.apply_error(error).await),
        };

        if !descriptor.should_dedupe() {
            return self.execute(descriptor, cache_key).await;
        }

        let shared = {
            let mut inflight = inner.inflight.lock().await;
            match inflight.get(&key) {
                Some(existing) => {
                    tracing::debug!("Joining identical in-flight request");
                    if let Some(metrics) = &inner.metrics {
                        metrics.record_dedup();
                    }
                    existing.clone()
                }
                None => {
                    // The leader runs on its own task so it finishes and
                    // leaves the map even when every caller goes away
                    let client = self.clone();
                    let entry_key = key.clone();
                    let leader = tokio::spawn(
                        async move {
                            let result = client.execute(descriptor, cache_key).await;
                            client.inner.inflight.lock().await.remove(&entry_key);
                            result
                        }
                        .instrument(tracing::Span::current()),
                    );
                    let future = async move {
                        leader.await.unwrap_or_else(|e| {
                            Err(ApiError::network(format!("Request task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, future.clone());
                    future
                }
            }
        };

        shared.await
    }

    async fn execute(
        &self,
        request: Arc<RequestDescriptor>,
        cache_key: Option<String>,
    ) -> ApiResult<ApiResponse> {
        let inner = &self.inner;
        let policy = match request.retries {
            Some(attempts) => inner.retry.clone().with_max_attempts(attempts),
            None => inner.retry.clone(),
        };

        let mut attempt = 1u32;
        loop {
            let Some(permit) = inner.breaker.acquire().await else {
                if attempt > 1 {
                    tracing::warn!(attempt, "Circuit breaker opened during retries");
                }
                let error = ApiError::circuit_open().with_request(request.clone());
                return Err(inner.interceptors.apply_error(error).await);
            };

            let error = match self.attempt(&request).await {
                Ok(response) => {
                    permit.record_success().await;
                    self.record_circuit_state().await;
                    return self.finish(&request, cache_key, response).await;
                }
                Err(error) => error,
            };

            if error.retryable {
                permit.record_failure().await;
            } else if matches!(error.kind, ApiErrorKind::Http | ApiErrorKind::Codec) {
                permit.record_success().await;
            } else {
                drop(permit);
            }
            self.record_circuit_state().await;

            let error = inner
                .interceptors
                .apply_error(error.with_request(request.clone()))
                .await;

            match policy.decide(attempt, &error) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        status = error.status,
                        error = %error,
                        "Request attempt failed, retrying"
                    );
                    if let Some(metrics) = &inner.metrics {
                        metrics.record_retry(request.method.as_str());
                    }
                    inner.clock.sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }

    async fn attempt(&self, request: &RequestDescriptor) -> ApiResult<ApiResponse> {
        let timeout = request.timeout.unwrap_or(self.inner.default_timeout);

        let raw = tokio::select! {
            result = self.inner.transport.send(request) => result?,
            _ = self.inner.clock.sleep(timeout) => return Err(ApiError::timeout(timeout)),
        };

        if !raw.is_success() {
            return Err(ApiError::from_response_body(raw.status, &raw.body));
        }

        let status = raw.status;
        let data = ResponseBody::decode(raw.content_type(), raw.body.clone())
            .map_err(|e| ApiError::codec(status, format!("Failed to decode response body: {e}")))?;

        Ok(ApiResponse {
            data,
            status,
            headers: raw.headers,
            cached: false,
        })
    }

    async fn finish(
        &self,
        request: &Arc<RequestDescriptor>,
        cache_key: Option<String>,
        response: ApiResponse,
    ) -> ApiResult<ApiResponse> {
        let inner = &self.inner;
        let response = match inner.interceptors.apply_response(response).await {
            Ok(response) => response,
            Err(error) => {
                let error = error.with_request(request.clone());
                return Err(inner.interceptors.apply_error(error).await);
            }
        };

        if let Some(cache_key) = cache_key.filter(|_| request.is_cacheable()) {
            let ttl = request.cache_ttl.unwrap_or(inner.default_cache_ttl);
            if !ttl.is_zero() {
                inner.cache.set(cache_key, response.clone(), ttl).await;
            }
        }

        Ok(response)
    }

    async fn record_circuit_state(&self) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_circuit_state(self.inner.breaker.state().await);
        }
    }

    /// Open a server-sent event stream
    ///
    /// Request interceptors run once, when the stream is opened; reconnects
    /// reuse the intercepted request.
    pub async fn event_source(&self, url: &str) -> ApiResult<EventSource> {
        let request = RequestDescriptor::new(
            Method::Get,
            resolve_url(self.inner.base_url.as_deref(), url),
        )
        .with_header("accept", "text/event-stream")
        .skip_cache();
        let request = self.inner.interceptors.apply_request(request).await?;

        Ok(EventSource::spawn(
            self.inner.transport.clone(),
            request,
            self.inner.event_source.clone(),
            self.inner.clock.clone(),
        ))
    }

    /// Drop the cached response stored under `key`
    ///
    /// Keys come from [`RequestDescriptor::cache_key`].
    pub async fn invalidate(&self, key: &str) -> bool {
        self.inner.cache.invalidate(key).await
    }

    /// Drop cached responses whose key matches `pattern`
    ///
    /// Keys look like `GET:https://host/path:`; see
    /// [`CacheManager::invalidate_pattern`] for the pattern syntax.
    pub async fn invalidate_pattern(&self, pattern: &str) -> plotline_core::Result<usize> {
        self.inner.cache.invalidate_pattern(pattern).await
    }

    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
    }

    /// Stored responses, including expired ones not yet swept
    pub async fn cache_size(&self) -> usize {
        self.inner.cache.size().await
    }

    pub fn cache(&self) -> &CacheManager<ApiResponse> {
        &self.inner.cache
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state().await
    }

    pub async fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.inner.breaker.snapshot().await
    }

    pub async fn reset_circuit(&self) {
        self.inner.breaker.reset().await;
    }

    /// Number of distinct requests currently in flight with deduplication
    pub async fn inflight_len(&self) -> usize {
        self.inner.inflight.lock().await.len()
    }

    /// Whether the background cache sweeper is running
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .as_ref()
            .map(CleanupTask::is_running)
            .unwrap_or(false)
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> ApiResult<serde_json::Value> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::codec(0, format!("Failed to serialize request body: {e}")))
}
