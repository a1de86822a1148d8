//! Shared foundation for the plotline clients
//!
//! This crate holds what both the HTTP request client and the realtime
//! WebSocket client depend on:
//!
//! - **Error handling**: [`Error`] for crate-level failures and [`ApiError`]
//!   for typed HTTP failures
//! - **Types**: [`RequestDescriptor`], [`ApiResponse`] and the realtime
//!   [`Envelope`]
//! - **Codec**: envelope encoding and the reserved message types
//! - **Clock**: an injectable time source so expiry, backoff and heartbeats
//!   can be tested without waiting
//! - **Observability**: OpenTelemetry and `tracing-subscriber` setup
//!
//! # Example
//!
//! ```rust
//! use plotline_core::{codec, Envelope};
//!
//! let envelope = Envelope::new("job_progress").with_job("job-1");
//! let text = codec::encode_envelope(&envelope).unwrap();
//! let decoded = codec::decode_envelope(&text).unwrap();
//! assert_eq!(decoded, envelope);
//! ```

pub mod clock;
pub mod codec;
pub mod error;
pub mod observability;
pub mod serde_ms;
pub mod types;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, TokioClock};
pub use error::{ApiError, ApiErrorKind, ApiResult, Error, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{
    ApiResponse, Envelope, FormPart, Headers, Method, RequestBody, RequestDescriptor,
    ResponseBody,
};
