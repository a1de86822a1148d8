//! Codec for realtime envelopes
//!
//! Envelopes travel as JSON text frames. This module turns [`Envelope`]s into
//! frame text and back, and names the message types with fixed meaning.
//!
//! # Reserved Types
//!
//! - `ping` / `pong`: heartbeat traffic, answered and consumed by the client
//!   and never delivered to subscribers
//! - `subscribe` / `unsubscribe`: job subscription control, sent by the client
//!
//! # Examples
//!
//! ```rust
//! use plotline_core::{codec, Envelope};
//!
//! let text = codec::encode_envelope(&Envelope::new("ping")).unwrap();
//! assert_eq!(text, r#"{"type":"ping"}"#);
//!
//! let decoded = codec::decode_envelope(&text).unwrap();
//! assert!(codec::is_heartbeat(&decoded.kind));
//! ```

use crate::error::{Error, Result};
use crate::types::Envelope;

/// Heartbeat request
pub const PING: &str = "ping";
/// Heartbeat reply
pub const PONG: &str = "pong";
/// Start receiving events for a job
pub const SUBSCRIBE: &str = "subscribe";
/// Stop receiving events for a job
pub const UNSUBSCRIBE: &str = "unsubscribe";
/// Subscription key matching every non-heartbeat message
pub const WILDCARD: &str = "*";

/// Job progress update
pub const JOB_PROGRESS: &str = "job_progress";
/// Job finished successfully
pub const JOB_COMPLETE: &str = "job_complete";
/// Job failed
pub const JOB_ERROR: &str = "job_error";

/// Message types delivered to a job subscription
pub const JOB_EVENT_TYPES: [&str; 3] = [JOB_PROGRESS, JOB_COMPLETE, JOB_ERROR];

/// True for `ping` and `pong`
pub fn is_heartbeat(kind: &str) -> bool {
    kind == PING || kind == PONG
}

/// Encode an envelope as frame text
pub fn encode_envelope(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode frame text into an envelope
///
/// # Errors
///
/// Returns `Error::Serialization` when the text is not JSON or has no
/// string `type` field.
pub fn decode_envelope(text: &str) -> Result<Envelope> {
    serde_json::from_str(text).map_err(|e| Error::Serialization(e.to_string()))
}

/// `ping` stamped with the current time
pub fn ping() -> Envelope {
    Envelope::new(PING).stamped()
}

/// `pong` stamped with the current time
pub fn pong() -> Envelope {
    Envelope::new(PONG).stamped()
}

/// `subscribe` control message for a job
pub fn subscribe(job_id: &str) -> Envelope {
    Envelope::new(SUBSCRIBE).with_job(job_id)
}

/// `unsubscribe` control message for a job
pub fn unsubscribe(job_id: &str) -> Envelope {
    Envelope::new(UNSUBSCRIBE).with_job(job_id)
}
