//! Realtime client metrics
//!
//! OpenTelemetry instruments for connection health, recorded when
//! observability is enabled through
//! [`RealtimeClientBuilder::with_observability`](crate::RealtimeClientBuilder::with_observability).
//!
//! # Metrics Collected
//!
//! - **connection_state**: 0=disconnected, 1=reconnecting, 2=connected (gauge)
//! - **reconnection_attempts / reconnection_success**: reconnect outcomes
//! - **messages_sent / messages_received**: frames by message type
//! - **messages_queued**: messages held back while offline
//! - **heartbeat_timeouts**: pongs that never arrived
//! - **errors_total**: connection errors by kind

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Meter},
    KeyValue,
};

/// Realtime client metrics for monitoring
pub struct RealtimeMetrics {
    pub connection_state: Gauge<i64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
    pub messages_sent: Counter<u64>,
    pub messages_received: Counter<u64>,
    pub messages_queued: Counter<u64>,
    pub heartbeat_timeouts: Counter<u64>,
    pub errors_total: Counter<u64>,
}

impl RealtimeMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("plotline.realtime.connection.state")
                .with_description("Connection state (0=disconnected, 1=reconnecting, 2=connected)")
                .build(),
            reconnection_attempts: meter
                .u64_counter("plotline.realtime.reconnection.attempts")
                .with_description("Total number of reconnection attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("plotline.realtime.reconnection.success")
                .with_description("Total number of successful reconnections")
                .build(),
            messages_sent: meter
                .u64_counter("plotline.realtime.messages.sent")
                .with_description("Messages written to the socket")
                .build(),
            messages_received: meter
                .u64_counter("plotline.realtime.messages.received")
                .with_description("Messages read from the socket")
                .build(),
            messages_queued: meter
                .u64_counter("plotline.realtime.messages.queued")
                .with_description("Messages queued while the connection was down")
                .build(),
            heartbeat_timeouts: meter
                .u64_counter("plotline.realtime.heartbeat.timeouts")
                .with_description("Heartbeats that were not answered in time")
                .build(),
            errors_total: meter
                .u64_counter("plotline.realtime.errors.total")
                .with_description("Total number of connection errors")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(state.as_gauge(), &[]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    pub fn record_sent(&self, kind: &str) {
        self.messages_sent
            .add(1, &[KeyValue::new("type", kind.to_string())]);
    }

    pub fn record_received(&self, kind: &str) {
        self.messages_received
            .add(1, &[KeyValue::new("type", kind.to_string())]);
    }

    pub fn record_queued(&self) {
        self.messages_queued.add(1, &[]);
    }

    pub fn record_heartbeat_timeout(&self) {
        self.heartbeat_timeouts.add(1, &[]);
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type.to_string())]);
    }
}
