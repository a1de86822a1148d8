//! plotline - resilient network client layer
//!
//! This is the main convenience crate that re-exports all plotline sub-crates.
//! Use this crate if you want a single dependency that provides both the
//! request client and the realtime client.
//!
//! # Architecture
//!
//! plotline is organized into modular crates:
//!
//! - **plotline-core**: errors, request/response types, wire envelope, clock, observability
//! - **plotline-http**: request client with caching, circuit breaking, retries and SSE
//! - **plotline-realtime**: reconnecting WebSocket client with subscriptions
//!
//! # Quick Start - Requests
//!
//! ```rust,no_run
//! use plotline::RequestClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RequestClient::builder()
//!         .base_url("http://localhost:8000/api")
//!         .build()?;
//!
//!     let metrics = client.get("/graph/metrics").await?;
//!     println!("cached: {}, data: {:?}", metrics.cached, metrics.data);
//!     Ok(())
//! }
//! ```
//!
//! # Quick Start - Realtime
//!
//! ```rust,no_run
//! use plotline::RealtimeClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RealtimeClient::new("ws://localhost:8000/ws")?;
//!     let _job = client.subscribe_to_job("job-1", |envelope| {
//!         println!("{}: {:?}", envelope.kind, envelope.payload);
//!     });
//!     client.connect().await?;
//!     Ok(())
//! }
//! ```

pub use plotline_core as core;
pub use plotline_http as http;
pub use plotline_realtime as realtime;

pub use plotline_core::{ApiError, ApiErrorKind, ApiResponse, Envelope, Error, Result};
pub use plotline_http::RequestClient;
pub use plotline_realtime::RealtimeClient;
