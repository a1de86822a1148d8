//! Request client metrics
//!
//! OpenTelemetry instruments recorded by [`RequestClient`](crate::RequestClient)
//! when observability is enabled on its builder.
//!
//! # Metrics Collected
//!
//! - **plotline.http.requests.total**: completed requests by method and outcome
//! - **plotline.http.request.duration**: end-to-end latency in seconds
//! - **plotline.http.retries.total**: retry attempts
//! - **plotline.http.cache.hits / cache.misses**: cache lookups
//! - **plotline.http.dedup.joined**: calls served by an in-flight request
//! - **plotline.http.circuit.state**: 0 closed, 1 half-open, 2 open
//! - **plotline.http.errors.total**: failures by error kind

use crate::circuit_breaker::CircuitState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};
use plotline_core::ApiErrorKind;

/// Instruments for the request client
pub struct HttpMetrics {
    pub requests_total: Counter<u64>,
    pub request_duration: Histogram<f64>,
    pub retries_total: Counter<u64>,
    pub cache_hits: Counter<u64>,
    pub cache_misses: Counter<u64>,
    pub dedup_joined: Counter<u64>,
    pub circuit_state: Gauge<i64>,
    pub errors_total: Counter<u64>,
}

impl HttpMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        // The global meter API wants a 'static name
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("plotline.http.requests.total")
                .with_description("Completed requests by method and outcome")
                .build(),
            request_duration: meter
                .f64_histogram("plotline.http.request.duration")
                .with_description("Request duration in seconds, retries included")
                .build(),
            retries_total: meter
                .u64_counter("plotline.http.retries.total")
                .with_description("Retry attempts")
                .build(),
            cache_hits: meter
                .u64_counter("plotline.http.cache.hits")
                .with_description("Requests served from the response cache")
                .build(),
            cache_misses: meter
                .u64_counter("plotline.http.cache.misses")
                .with_description("Cacheable requests not found in the cache")
                .build(),
            dedup_joined: meter
                .u64_counter("plotline.http.dedup.joined")
                .with_description("Calls that joined an identical in-flight request")
                .build(),
            circuit_state: meter
                .i64_gauge("plotline.http.circuit.state")
                .with_description("Circuit breaker state (0=closed, 1=half-open, 2=open)")
                .build(),
            errors_total: meter
                .u64_counter("plotline.http.errors.total")
                .with_description("Failed requests by error kind")
                .build(),
        }
    }

    pub fn record_request(&self, method: &str, outcome: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    pub fn record_retry(&self, method: &str) {
        self.retries_total
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.add(1, &[]);
        } else {
            self.cache_misses.add(1, &[]);
        }
    }

    pub fn record_dedup(&self) {
        self.dedup_joined.add(1, &[]);
    }

    pub fn record_circuit_state(&self, state: CircuitState) {
        self.circuit_state.record(state.as_gauge(), &[]);
    }

    pub fn record_error(&self, kind: ApiErrorKind) {
        self.errors_total
            .add(1, &[KeyValue::new("kind", kind.as_str())]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_without_provider() {
        // Without an installed provider the global meter is a no-op
        let metrics = HttpMetrics::new("plotline-http-test");
        metrics.record_request("GET", "success", 0.12);
        metrics.record_retry("GET");
        metrics.record_cache(true);
        metrics.record_cache(false);
        metrics.record_dedup();
        metrics.record_circuit_state(CircuitState::Open);
        metrics.record_error(ApiErrorKind::Timeout);
    }
}
