//! Request, response and error interceptors
//!
//! Interceptors let the application adjust traffic without touching each
//! call site. Three hooks run in registration order:
//!
//! - **RequestInterceptor**: transforms the descriptor before it is sent
//!   (auth headers, tracing ids). Returning an error aborts the call.
//! - **ResponseInterceptor**: transforms a successful response before it is
//!   cached and returned.
//! - **ErrorInterceptor**: transforms the error of each failed attempt
//!   before the retry decision, so it may rewrite messages or mark an error
//!   non-retryable.
//!
//! Closures can be registered through the `*_fn` adapters.
//!
//! # Built-in Interceptors
//!
//! - **BearerAuth**: adds `Authorization: Bearer <token>` from a token source
//! - **DefaultHeaders**: adds headers the call did not set itself
//! - **LoggingInterceptor**: logs requests, responses and errors via tracing
//!
//! # Examples
//!
//! ```rust
//! use plotline_http::interceptor::{request_fn, BearerAuth, InterceptorChain};
//!
//! let mut chain = InterceptorChain::new();
//! chain.add_request(BearerAuth::new(|| Some("token-123".to_string())));
//! chain.add_request(request_fn(|request| Ok(request.with_header("x-client", "studio"))));
//! assert_eq!(chain.len(), 2);
//! ```

use async_trait::async_trait;
use plotline_core::{ApiError, ApiResponse, ApiResult, RequestDescriptor};
use std::sync::Arc;

/// Hook run before a request is sent
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn on_request(&self, request: RequestDescriptor) -> ApiResult<RequestDescriptor>;
}

/// Hook run on every successful response
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_response(&self, response: ApiResponse) -> ApiResult<ApiResponse>;
}

/// Hook run on every failed attempt
#[async_trait]
pub trait ErrorInterceptor: Send + Sync {
    async fn on_error(&self, error: ApiError) -> ApiError;
}

/// Adapter turning a synchronous closure into a [`RequestInterceptor`]
pub struct RequestFn<F>(F);

/// Adapter turning a synchronous closure into a [`ResponseInterceptor`]
pub struct ResponseFn<F>(F);

/// Adapter turning a synchronous closure into an [`ErrorInterceptor`]
pub struct ErrorFn<F>(F);

pub fn request_fn<F>(f: F) -> RequestFn<F>
where
    F: Fn(RequestDescriptor) -> ApiResult<RequestDescriptor> + Send + Sync + 'static,
{
    RequestFn(f)
}

pub fn response_fn<F>(f: F) -> ResponseFn<F>
where
    F: Fn(ApiResponse) -> ApiResult<ApiResponse> + Send + Sync + 'static,
{
    ResponseFn(f)
}

pub fn error_fn<F>(f: F) -> ErrorFn<F>
where
    F: Fn(ApiError) -> ApiError + Send + Sync + 'static,
{
    ErrorFn(f)
}

#[async_trait]
impl<F> RequestInterceptor for RequestFn<F>
where
    F: Fn(RequestDescriptor) -> ApiResult<RequestDescriptor> + Send + Sync + 'static,
{
    async fn on_request(&self, request: RequestDescriptor) -> ApiResult<RequestDescriptor> {
        (self.0)(request)
    }
}

#[async_trait]
impl<F> ResponseInterceptor for ResponseFn<F>
where
    F: Fn(ApiResponse) -> ApiResult<ApiResponse> + Send + Sync + 'static,
{
    async fn on_response(&self, response: ApiResponse) -> ApiResult<ApiResponse> {
        (self.0)(response)
    }
}

#[async_trait]
impl<F> ErrorInterceptor for ErrorFn<F>
where
    F: Fn(ApiError) -> ApiError + Send + Sync + 'static,
{
    async fn on_error(&self, error: ApiError) -> ApiError {
        (self.0)(error)
    }
}

/// Ordered interceptor lists
#[derive(Clone, Default)]
pub struct InterceptorChain {
    request: Vec<Arc<dyn RequestInterceptor>>,
    response: Vec<Arc<dyn ResponseInterceptor>>,
    error: Vec<Arc<dyn ErrorInterceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request<I: RequestInterceptor + 'static>(&mut self, interceptor: I) {
        self.request.push(Arc::new(interceptor));
    }

    pub fn add_response<I: ResponseInterceptor + 'static>(&mut self, interceptor: I) {
        self.response.push(Arc::new(interceptor));
    }

    pub fn add_error<I: ErrorInterceptor + 'static>(&mut self, interceptor: I) {
        self.error.push(Arc::new(interceptor));
    }

    /// Register one value on all three hooks
    pub fn add_all<I>(&mut self, interceptor: I)
    where
        I: RequestInterceptor + ResponseInterceptor + ErrorInterceptor + 'static,
    {
        let shared = Arc::new(interceptor);
        self.request.push(shared.clone());
        self.response.push(shared.clone());
        self.error.push(shared);
    }

    pub async fn apply_request(&self, mut request: RequestDescriptor) -> ApiResult<RequestDescriptor> {
        for interceptor in &self.request {
            request = interceptor.on_request(request).await?;
        }
        Ok(request)
    }

    pub async fn apply_response(&self, mut response: ApiResponse) -> ApiResult<ApiResponse> {
        for interceptor in &self.response {
            response = interceptor.on_response(response).await?;
        }
        Ok(response)
    }

    pub async fn apply_error(&self, mut error: ApiError) -> ApiError {
        for interceptor in &self.error {
            error = interceptor.on_error(error).await;
        }
        error
    }

    /// Total number of registered hooks
    pub fn len(&self) -> usize {
        self.request.len() + self.response.len() + self.error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adds `Authorization: Bearer <token>` when the token source yields one
///
/// Calls that already carry an `Authorization` header are left alone.
pub struct BearerAuth {
    token: Box<dyn Fn() -> Option<String> + Send + Sync>,
}

impl BearerAuth {
    pub fn new<F>(token: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        Self {
            token: Box::new(token),
        }
    }

    /// Fixed token
    pub fn token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self::new(move || Some(token.clone()))
    }
}

#[async_trait]
impl RequestInterceptor for BearerAuth {
    async fn on_request(&self, mut request: RequestDescriptor) -> ApiResult<RequestDescriptor> {
        if request.header("authorization").is_none() {
            if let Some(token) = (self.token)() {
                request.set_header("authorization", format!("Bearer {}", token));
            }
        }
        Ok(request)
    }
}

/// Adds headers that the call did not set itself
#[derive(Debug, Clone, Default)]
pub struct DefaultHeaders {
    headers: Vec<(String, String)>,
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
        self
    }
}

#[async_trait]
impl RequestInterceptor for DefaultHeaders {
    async fn on_request(&self, mut request: RequestDescriptor) -> ApiResult<RequestDescriptor> {
        for (name, value) in &self.headers {
            if request.header(name).is_none() {
                request.set_header(name, value.clone());
            }
        }
        Ok(request)
    }
}

/// Logs traffic through tracing
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

#[async_trait]
impl RequestInterceptor for LoggingInterceptor {
    async fn on_request(&self, request: RequestDescriptor) -> ApiResult<RequestDescriptor> {
        tracing::debug!(method = %request.method, url = %request.url, "Sending request");
        Ok(request)
    }
}

#[async_trait]
impl ResponseInterceptor for LoggingInterceptor {
    async fn on_response(&self, response: ApiResponse) -> ApiResult<ApiResponse> {
        tracing::debug!(status = response.status, cached = response.cached, "Received response");
        Ok(response)
    }
}

#[async_trait]
impl ErrorInterceptor for LoggingInterceptor {
    async fn on_error(&self, error: ApiError) -> ApiError {
        tracing::debug!(
            kind = %error.kind,
            status = error.status,
            retryable = error.retryable,
            message = %error.message,
            "Request attempt failed"
        );
        error
    }
}
