//! Error types for plotline
//!
//! Two layers of errors are used across the workspace:
//!
//! - **Error**: crate-level errors for configuration, codec and realtime
//!   failures (uses thiserror)
//! - **ApiError**: the typed failure returned by every HTTP request, carrying
//!   an [`ApiErrorKind`], the HTTP status (0 for transport-level failures), a
//!   retryability flag and the originating request
//!
//! # Retryability
//!
//! Retryability is derived from the kind and the status. Network failures and
//! timeouts are always retryable, HTTP failures are retryable when the status
//! is 500 or above, and circuit rejections and codec failures never are.
//!
//! # Examples
//!
//! ```rust
//! use plotline_core::{ApiError, ApiErrorKind};
//!
//! let error = ApiError::http(503, "Service unavailable", None);
//! assert_eq!(error.kind, ApiErrorKind::Http);
//! assert!(error.retryable);
//!
//! let error = ApiError::http(404, "Not found", None);
//! assert!(!error.retryable);
//! ```

use crate::types::RequestDescriptor;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for plotline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for HTTP requests
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Crate-level error type
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A request failed; see [`ApiError`] for details
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket transport layer error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The caller supplied something unusable (bad pattern, bad body, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A URL could not be used for the requested transport
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The realtime connection is closed and no driver is running
    #[error("Connection closed")]
    ConnectionClosed,

    /// The reconnection strategy gave up
    ///
    /// Reported by the realtime client once the configured number of
    /// reconnection attempts has been used without establishing a session.
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of reconnection attempts that were made
        attempts: u32,
    },

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Classification of a failed HTTP request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    /// The transport could not reach the server or the connection broke
    Network,
    /// No response arrived within the request timeout
    Timeout,
    /// The server answered with a non-2xx status
    Http,
    /// The circuit breaker rejected the request without contacting the server
    CircuitOpen,
    /// A body could not be encoded or a response body could not be decoded
    Codec,
}

impl ApiErrorKind {
    /// Short lowercase label, used for logs and metric attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiErrorKind::Network => "network",
            ApiErrorKind::Timeout => "timeout",
            ApiErrorKind::Http => "http",
            ApiErrorKind::CircuitOpen => "circuit_open",
            ApiErrorKind::Codec => "codec",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure of an HTTP request
///
/// `status` is the HTTP status for [`ApiErrorKind::Http`] failures, 503 for
/// circuit rejections and 0 when no response was received at all.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    /// What went wrong
    pub kind: ApiErrorKind,
    /// Human-readable message, taken from the response body when possible
    pub message: String,
    /// HTTP status, or 0 for network failures and timeouts
    pub status: u16,
    /// Whether repeating the request may succeed
    pub retryable: bool,
    /// Parsed error body returned by the server, if any
    pub details: Option<serde_json::Value>,
    /// The request that produced this error
    pub request: Option<Arc<RequestDescriptor>>,
}

impl ApiError {
    fn new(kind: ApiErrorKind, status: u16, message: impl Into<String>) -> Self {
        let retryable = match kind {
            ApiErrorKind::Network | ApiErrorKind::Timeout => true,
            ApiErrorKind::Http => status >= 500,
            ApiErrorKind::CircuitOpen | ApiErrorKind::Codec => false,
        };
        Self {
            kind,
            message: message.into(),
            status,
            retryable,
            details: None,
            request: None,
        }
    }

    /// The server could not be reached or the connection broke mid-request
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, 0, message)
    }

    /// The request did not complete within `after`
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ApiErrorKind::Timeout,
            0,
            format!("Request timed out after {}ms", after.as_millis()),
        )
    }

    /// The server responded with a non-2xx status
    pub fn http(
        status: u16,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        let mut error = Self::new(ApiErrorKind::Http, status, message);
        error.details = details;
        error
    }

    /// Build an HTTP error from a raw error response body
    ///
    /// JSON bodies are kept as `details`, and a `detail`, `message` or
    /// `error` string field becomes the message. Other bodies fall back to a
    /// generic message naming the status.
    pub fn from_response_body(status: u16, body: &[u8]) -> Self {
        let details: Option<serde_json::Value> = serde_json::from_slice(body).ok();
        let message = details
            .as_ref()
            .and_then(|value| {
                ["detail", "message", "error"]
                    .iter()
                    .find_map(|field| value.get(*field).and_then(|v| v.as_str()))
            })
            .map(str::to_string)
            .unwrap_or_else(|| format!("Request failed with status {}", status));
        Self::http(status, message, details)
    }

    /// The circuit breaker rejected the request
    pub fn circuit_open() -> Self {
        Self::new(
            ApiErrorKind::CircuitOpen,
            503,
            "Circuit breaker is open, request rejected",
        )
    }

    /// A body could not be encoded, or a response body could not be decoded
    pub fn codec(status: u16, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Codec, status, message)
    }

    /// Attach the originating request
    pub fn with_request(mut self, request: Arc<RequestDescriptor>) -> Self {
        self.request = Some(request);
        self
    }

    /// Override the computed retryability
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// True for timeouts
    pub fn is_timeout(&self) -> bool {
        self.kind == ApiErrorKind::Timeout
    }

    /// True for circuit breaker rejections
    pub fn is_circuit_open(&self) -> bool {
        self.kind == ApiErrorKind::CircuitOpen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Method;
    use serde_json::json;

    #[test]
    fn test_retryability_by_kind() {
        assert!(ApiError::network("connection refused").retryable);
        assert!(ApiError::timeout(Duration::from_secs(1)).retryable);
        assert!(ApiError::http(500, "boom", None).retryable);
        assert!(ApiError::http(502, "bad gateway", None).retryable);
        assert!(!ApiError::http(400, "bad request", None).retryable);
        assert!(!ApiError::http(404, "missing", None).retryable);
        assert!(!ApiError::circuit_open().retryable);
        assert!(!ApiError::codec(200, "invalid json").retryable);
    }

    #[test]
    fn test_transport_failures_have_status_zero() {
        assert_eq!(ApiError::network("reset").status, 0);
        assert_eq!(ApiError::timeout(Duration::from_millis(250)).status, 0);
        assert_eq!(ApiError::circuit_open().status, 503);
    }

    #[test]
    fn test_timeout_message() {
        let error = ApiError::timeout(Duration::from_millis(1500));
        assert_eq!(error.to_string(), "Request timed out after 1500ms");
        assert!(error.is_timeout());
    }

    #[test]
    fn test_from_response_body_uses_detail_field() {
        let body = serde_json::to_vec(&json!({"detail": "Project not found"})).unwrap();
        let error = ApiError::from_response_body(404, &body);
        assert_eq!(error.message, "Project not found");
        assert_eq!(error.status, 404);
        assert_eq!(error.details, Some(json!({"detail": "Project not found"})));
    }

    #[test]
    fn test_from_response_body_falls_back_to_status() {
        let error = ApiError::from_response_body(502, b"<html>Bad Gateway</html>");
        assert_eq!(error.message, "Request failed with status 502");
        assert!(error.details.is_none());
        assert!(error.retryable);
    }

    #[test]
    fn test_with_request_attaches_descriptor() {
        let request = Arc::new(RequestDescriptor::new(Method::Get, "/graph/metrics"));
        let error = ApiError::network("reset").with_request(request);
        assert_eq!(error.request.unwrap().url, "/graph/metrics");
    }

    #[test]
    fn test_error_wraps_api_error() {
        let error: Error = ApiError::http(500, "boom", None).into();
        assert_eq!(error.to_string(), "boom");

        let error = Error::ReconnectExhausted { attempts: 10 };
        assert_eq!(error.to_string(), "Reconnection abandoned after 10 attempts");
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ApiErrorKind::CircuitOpen.to_string(), "circuit_open");
        assert_eq!(ApiErrorKind::Network.as_str(), "network");
    }
}
