//! Wire types shared by the HTTP and realtime clients
//!
//! # HTTP
//!
//! - [`RequestDescriptor`]: everything the request pipeline needs to know
//!   about one call (method, URL, body, headers, and per-call overrides for
//!   timeout, retries, cache TTL and deduplication)
//! - [`ApiResponse`]: the decoded result of a successful call
//! - [`ResponseBody`]: the body, decoded according to its content type
//!
//! # Realtime
//!
//! - [`Envelope`]: the JSON object exchanged over the WebSocket,
//!   `{"type": ..., "job_id": ..., "payload": ..., "timestamp": ...}`
//!
//! Header names are stored lowercased so lookups are case-insensitive.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Header map with lowercased names
pub type Headers = BTreeMap<String, String>;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Uppercase method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// GET and HEAD: responses may be cached and concurrent calls collapsed
    pub fn is_read(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field of a multipart form
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    /// Plain text field
    Text { name: String, value: String },
    /// File field
    File {
        name: String,
        filename: String,
        content_type: Option<String>,
        data: Bytes,
    },
}

impl FormPart {
    /// A text field
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormPart::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    /// A file field
    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        FormPart::File {
            name: name.into(),
            filename: filename.into(),
            content_type: None,
            data: data.into(),
        }
    }

    /// Identifies the field and its content; file data is summarized by length and hash
    fn key_fragment(&self) -> String {
        match self {
            FormPart::Text { name, value } => format!("{name}={value}"),
            FormPart::File {
                name,
                filename,
                data,
                ..
            } => {
                let mut hasher = DefaultHasher::new();
                data.hash(&mut hasher);
                format!("{name}={filename}:{}:{:016x}", data.len(), hasher.finish())
            }
        }
    }

    /// Set the content type of a file field; no effect on text fields
    pub fn with_content_type(mut self, mime: impl Into<String>) -> Self {
        if let FormPart::File { content_type, .. } = &mut self {
            *content_type = Some(mime.into());
        }
        self
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with `content-type: application/json`
    Json(Value),
    /// Sent verbatim
    Text(String),
    /// Multipart form upload
    Multipart(Vec<FormPart>),
}

impl RequestBody {
    fn key_fragment(&self) -> String {
        match self {
            RequestBody::Json(value) => value.to_string(),
            RequestBody::Text(text) => text.clone(),
            RequestBody::Multipart(parts) => {
                let fields: Vec<String> = parts.iter().map(FormPart::key_fragment).collect();
                format!("multipart[{}]", fields.join(","))
            }
        }
    }
}

/// Everything the request pipeline needs to know about one call
///
/// Fields left as `None` fall back to the client's defaults.
///
/// # Examples
///
/// ```rust
/// use plotline_core::{Method, RequestDescriptor};
/// use std::time::Duration;
///
/// let request = RequestDescriptor::new(Method::Get, "/graph/metrics")
///     .with_header("X-Trace", "abc")
///     .with_timeout(Duration::from_secs(5))
///     .with_retries(1);
///
/// assert!(request.is_cacheable());
/// assert_eq!(request.headers.get("x-trace").map(String::as_str), Some("abc"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub url: String,
    pub body: Option<RequestBody>,
    pub headers: Headers,
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    /// Total number of attempts, including the first
    pub retries: Option<u32>,
    /// How long a successful read stays cached
    pub cache_ttl: Option<Duration>,
    /// Bypass the cache for this call (neither read nor written)
    pub skip_cache: bool,
    /// Collapse identical concurrent calls; defaults to true for reads
    pub dedupe: Option<bool>,
    /// Free-form data for interceptors
    pub metadata: BTreeMap<String, Value>,
}

impl RequestDescriptor {
    /// Create a descriptor with no body and default options
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: Headers::new(),
            timeout: None,
            retries: None,
            cache_ttl: None,
            skip_cache: false,
            dedupe: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_json(self, value: Value) -> Self {
        self.with_body(RequestBody::Json(value))
    }

    /// Set a header; the name is lowercased
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header in place; the name is lowercased
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, attempts: u32) -> Self {
        self.retries = Some(attempts);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = Some(dedupe);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Key shared by the cache and the in-flight map: method, URL and body
    pub fn cache_key(&self) -> String {
        let body = self
            .body
            .as_ref()
            .map(RequestBody::key_fragment)
            .unwrap_or_default();
        format!("{}:{}:{}", self.method, self.url, body)
    }

    /// Reads are cached unless the caller opted out
    pub fn is_cacheable(&self) -> bool {
        self.method.is_read() && !self.skip_cache
    }

    /// Whether identical concurrent calls share one transport call
    pub fn should_dedupe(&self) -> bool {
        self.dedupe.unwrap_or_else(|| self.method.is_read())
    }
}

/// Response body decoded by content type
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No body (204, HEAD, or zero-length)
    Empty,
    /// `application/json` and `+json` media types
    Json(Value),
    /// `text/*` and anything unrecognized
    Text(String),
    /// Images, audio, video, fonts, archives, PDFs and octet streams
    Binary(Bytes),
}

impl ResponseBody {
    /// Decode `body` according to a `content-type` header value
    ///
    /// Parameters such as `; charset=utf-8` are ignored. A JSON media type
    /// whose body does not parse is an error; an unknown media type is
    /// treated as text.
    pub fn decode(content_type: Option<&str>, body: Bytes) -> Result<Self> {
        if body.is_empty() {
            return Ok(ResponseBody::Empty);
        }

        let mime = content_type
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if mime == "application/json" || mime.ends_with("+json") {
            let value = serde_json::from_slice(&body)?;
            Ok(ResponseBody::Json(value))
        } else if mime.starts_with("text/") {
            Ok(ResponseBody::Text(String::from_utf8_lossy(&body).into_owned()))
        } else if is_binary_mime(&mime) {
            Ok(ResponseBody::Binary(body))
        } else {
            Ok(ResponseBody::Text(String::from_utf8_lossy(&body).into_owned()))
        }
    }

    /// The JSON value, if this is a JSON body
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The text, if this is a text body
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The raw bytes, if this is a binary body
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

fn is_binary_mime(mime: &str) -> bool {
    ["image/", "audio/", "video/", "font/"]
        .iter()
        .any(|prefix| mime.starts_with(prefix))
        || matches!(
            mime,
            "application/octet-stream"
                | "application/pdf"
                | "application/zip"
                | "application/gzip"
                | "application/x-tar"
                | "application/wasm"
        )
}

/// Successful HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub data: ResponseBody,
    pub status: u16,
    pub headers: Headers,
    /// True when served from the response cache
    pub cached: bool,
}

impl ApiResponse {
    /// Deserialize a JSON body into `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.data {
            ResponseBody::Json(value) => Ok(T::deserialize(value)?),
            ResponseBody::Empty => Ok(T::deserialize(Value::Null)?),
            other => Err(Error::Serialization(format!(
                "expected a JSON body, got {}",
                match other {
                    ResponseBody::Text(_) => "text",
                    _ => "binary",
                }
            ))),
        }
    }

    /// Look up a response header by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Realtime message envelope
///
/// Serialized as `{"type": "...", "job_id": "...", "payload": ..., "timestamp": ...}`
/// with absent fields omitted.
///
/// # Examples
///
/// ```rust
/// use plotline_core::Envelope;
/// use serde_json::json;
///
/// let envelope = Envelope::new("job_progress")
///     .with_job("job-42")
///     .with_payload(json!({"progress": 0.5}));
///
/// assert_eq!(envelope.kind, "job_progress");
/// assert_eq!(envelope.job_id.as_deref(), Some("job-42"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Left untyped: peers send epoch milliseconds or ISO strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            job_id: None,
            payload: None,
            timestamp: None,
        }
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Stamp with the current wall-clock time in epoch milliseconds
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(Value::from(now_epoch_ms()));
        self
    }

    /// Deserialize the payload into `T`; a missing payload reads as null
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.payload.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
