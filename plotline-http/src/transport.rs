//! HTTP transport seam
//!
//! The request client never talks to the network directly. It hands a fully
//! resolved [`RequestDescriptor`] to a [`Transport`] and gets back the raw
//! status, headers and body. Timeouts, retries and body decoding stay in
//! the client, so a transport only has to move bytes.
//!
//! [`HttpTransport`] is the production implementation on top of `reqwest`.
//! Tests plug in their own transport to script responses.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use plotline_core::{ApiError, ApiResult, FormPart, Headers, Method, RequestBody, RequestDescriptor};
use std::fmt;

/// Raw response as received from the wire
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// JSON response with the matching content type
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Response whose body arrives incrementally
pub struct StreamingResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: BoxStream<'static, ApiResult<Bytes>>,
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Moves requests to a server
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send the request and read the whole body
    ///
    /// Failures to reach the server map to [`ApiError::network`]. Non-2xx
    /// statuses are not errors at this level.
    async fn send(&self, request: &RequestDescriptor) -> ApiResult<TransportResponse>;

    /// Send the request and expose the body as a byte stream
    async fn open_stream(&self, request: &RequestDescriptor) -> ApiResult<StreamingResponse> {
        let _ = request;
        Err(ApiError::network("streaming responses are not supported by this transport"))
    }
}

/// `reqwest`-backed transport
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured `reqwest` client (proxies, TLS roots, pooling)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: &RequestDescriptor) -> ApiResult<reqwest::RequestBuilder> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.body {
            None => builder,
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Text(text)) => {
                if request.header("content-type").is_none() {
                    builder = builder.header("content-type", "text/plain; charset=utf-8");
                }
                builder.body(text.clone())
            }
            Some(RequestBody::Multipart(parts)) => builder.multipart(build_form(parts)?),
        };

        Ok(builder)
    }
}

fn build_form(parts: &[FormPart]) -> ApiResult<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                filename,
                content_type,
                data,
            } => {
                let mut file = reqwest::multipart::Part::bytes(data.to_vec()).file_name(filename.clone());
                if let Some(mime) = content_type {
                    file = file
                        .mime_str(mime)
                        .map_err(|e| ApiError::codec(0, format!("invalid content type {mime:?}: {e}")))?;
                }
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

fn map_reqwest_error(error: reqwest::Error) -> ApiError {
    if error.is_builder() {
        ApiError::codec(0, error.to_string()).with_retryable(false)
    } else {
        ApiError::network(error.to_string())
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> ApiResult<TransportResponse> {
        let response = self.build(request)?.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    async fn open_stream(&self, request: &RequestDescriptor) -> ApiResult<StreamingResponse> {
        let response = self.build(request)?.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes_stream().map_err(map_reqwest_error).boxed();

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}

/// Join a relative URL onto a base URL
///
/// Absolute `http(s)://` URLs pass through untouched.
pub fn resolve_url(base: Option<&str>, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    match base {
        Some(base) if !base.is_empty() => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        ),
        _ => url.to_string(),
    }
}
