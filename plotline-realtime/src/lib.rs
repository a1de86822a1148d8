//! Reconnecting WebSocket client for plotline realtime updates
//!
//! This crate keeps a single WebSocket open to the backend and turns its
//! JSON envelopes (`{"type": ..., "job_id": ..., "payload": ...}`) into
//! typed subscriptions. Connection loss is handled behind the scenes.
//!
//! # Core Features
//!
//! - **Auto-Reconnection**: exponential backoff after abnormal closures
//! - **Heartbeat**: ping/pong liveness check that drops silent connections
//! - **Outbound Queue**: messages sent while offline are delivered in order
//! - **Subscriptions**: handlers per message type, plus a `*` wildcard
//! - **Job Tracking**: progress, completion and error events for a job id
//! - **Connection State**: listeners and a `wait_for_state` future
//! - **Observability**: OpenTelemetry metrics and tracing spans
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use plotline_realtime::RealtimeClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RealtimeClient::new("ws://localhost:8080/ws")?;
//!
//!     let _updates = client.subscribe("graph_updated", |envelope| {
//!         println!("graph changed: {:?}", envelope.payload);
//!     });
//!     let job = client.subscribe_to_job("job-42", |envelope| {
//!         println!("{}: {:?}", envelope.kind, envelope.payload);
//!     });
//!
//!     client.connect().await?;
//!     client.send_message("graph_edit", &json!({"node": "n1"}))?;
//!
//!     job.unsubscribe();
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

mod client;
mod client_builder;
mod connection_state;
mod metrics;
mod reconnect;
mod subscription;

pub use client::RealtimeClient;
pub use client_builder::{RealtimeClientBuilder, RealtimeConfig};
pub use connection_state::{ConnectionManager, ConnectionState, StateListener};
pub use metrics::RealtimeMetrics;
pub use reconnect::{ExponentialBackoff, FixedDelay, NoReconnect, ReconnectionStrategy};
pub use subscription::{MessageHandler, Subscription, SubscriptionRegistry};

pub use plotline_core::{codec, Envelope, Error, Result};
