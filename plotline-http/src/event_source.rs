//! Server-sent event streams
//!
//! [`EventSource`] keeps a `text/event-stream` response open and yields the
//! parsed events as a [`Stream`]. When the connection drops it reconnects
//! on its own, sending `Last-Event-ID` so the server can resume, and waits
//! between attempts with exponential backoff starting from the server's
//! `retry:` hint (or the configured interval).
//!
//! The stream ends when [`EventSource::close`] is called, the handle is
//! dropped, the server answers with a non-retryable status (4xx, 204 or a
//! wrong content type), or the reconnect budget is used up.
//!
//! # Examples
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use plotline_http::RequestClient;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RequestClient::builder().base_url("https://api.example.com").build()?;
//! let mut events = client.event_source("/jobs/42/events").await?;
//!
//! while let Some(event) = events.next().await {
//!     println!("{}: {}", event.event, event.data);
//! }
//! # Ok(())
//! # }
//! ```

use crate::transport::Transport;
use futures::{Stream, StreamExt};
use plotline_core::{RequestDescriptor, SharedClock};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// One dispatched event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// Event type, `"message"` unless the server named one
    pub event: String,
    /// Data lines joined with `\n`
    pub data: String,
    /// Last event id seen on the stream when this event was dispatched
    pub id: Option<String>,
}

impl ServerEvent {
    /// Parse the data as JSON
    pub fn json<T: DeserializeOwned>(&self) -> plotline_core::Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Incremental `text/event-stream` parser
///
/// Feed raw chunks with [`push`](SseParser::push); chunk boundaries may fall
/// anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_type: String,
    data: String,
    last_event_id: Option<String>,
    retry: Option<Duration>,
    started: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the events it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ServerEvent> {
        self.buffer.extend_from_slice(chunk);
        if !self.started {
            // A BOM is only honoured as the very first bytes of the stream
            let seen = self.buffer.len().min(BOM.len());
            if self.buffer[..seen] != BOM[..seen] {
                self.started = true;
            } else if seen == BOM.len() {
                self.buffer.drain(..seen);
                self.started = true;
            }
        }

        let mut events = Vec::new();
        while let Some(position) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=position).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Forget a partially received event; the last event id survives
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.event_type.clear();
        self.data.clear();
        self.started = false;
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Most recent `retry:` hint
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = value.to_string(),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event_type = std::mem::take(&mut self.event_type);
        if self.data.is_empty() {
            return None;
        }
        let mut data = std::mem::take(&mut self.data);
        data.pop();

        Some(ServerEvent {
            event: if event_type.is_empty() {
                "message".to_string()
            } else {
                event_type
            },
            data,
            id: self.last_event_id.clone(),
        })
    }
}

/// Reconnect settings for event streams
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventSourceConfig {
    /// First reconnect delay when the server sent no `retry:` hint, in ms
    #[serde(with = "plotline_core::serde_ms")]
    pub reconnect_interval: Duration,
    /// Upper bound on the reconnect delay, in ms
    #[serde(with = "plotline_core::serde_ms")]
    pub max_reconnect_interval: Duration,
    /// Consecutive failed connection attempts before giving up; `None` retries forever
    pub max_reconnect_attempts: Option<u32>,
    /// Events buffered before the reader applies backpressure
    pub buffer: usize,
}

impl Default for EventSourceConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_interval: Duration::from_secs(30),
            max_reconnect_attempts: Some(10),
            buffer: 64,
        }
    }
}

/// Lifecycle of an [`EventSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSourceState {
    Connecting,
    Open,
    Closed,
}

/// Reconnecting server-sent event stream
pub struct EventSource {
    events: mpsc::Receiver<ServerEvent>,
    state: watch::Receiver<EventSourceState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl EventSource {
    /// Start streaming `request` through `transport`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        request: RequestDescriptor,
        config: EventSourceConfig,
        clock: SharedClock,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.buffer.max(1));
        let (state_tx, state_rx) = watch::channel(EventSourceState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = StreamWorker {
            transport,
            request,
            config,
            clock,
            events: events_tx,
            state: state_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        Self {
            events: events_rx,
            state: state_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    /// Next event, or `None` once the stream has ended
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    pub fn state(&self) -> EventSourceState {
        *self.state.borrow()
    }

    /// Wait until the stream reaches `state`
    pub async fn wait_for_state(&mut self, state: EventSourceState) {
        let _ = self.state.wait_for(|current| *current == state).await;
    }

    /// Stop streaming and wait for the connection to be released
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Stream for EventSource {
    type Item = ServerEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

enum Attempt {
    /// The stream was open and then ended
    Ended,
    /// Connecting failed in a way worth retrying
    Failed,
    /// Stop for good
    Terminal,
    /// Closed by the owner
    Shutdown,
}

struct StreamWorker {
    transport: Arc<dyn Transport>,
    request: RequestDescriptor,
    config: EventSourceConfig,
    clock: SharedClock,
    events: mpsc::Sender<ServerEvent>,
    state: watch::Sender<EventSourceState>,
    shutdown: watch::Receiver<bool>,
}

impl StreamWorker {
    async fn run(mut self) {
        let mut parser = SseParser::new();
        let mut failures = 0u32;

        loop {
            let _ = self.state.send(EventSourceState::Connecting);
            match self.connect_once(&mut parser).await {
                Attempt::Shutdown | Attempt::Terminal => break,
                Attempt::Ended => failures = 0,
                Attempt::Failed => failures += 1,
            }

            if let Some(max) = self.config.max_reconnect_attempts {
                if failures > max {
                    tracing::error!(attempts = failures, url = %self.request.url, "Event stream reconnection abandoned");
                    break;
                }
            }

            let base = parser.retry().unwrap_or(self.config.reconnect_interval);
            let exponent = failures.saturating_sub(1).min(31);
            let delay = base
                .saturating_mul(2u32.saturating_pow(exponent))
                .min(self.config.max_reconnect_interval);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting event stream");

            let sleep = self.clock.sleep(delay);
            tokio::select! {
                _ = sleep => {}
                _ = self.shutdown.changed() => break,
            }
        }

        let _ = self.state.send(EventSourceState::Closed);
        tracing::debug!(url = %self.request.url, "Event stream closed");
    }

    async fn connect_once(&mut self, parser: &mut SseParser) -> Attempt {
        let mut request = self.request.clone();
        if let Some(id) = parser.last_event_id() {
            request.set_header("last-event-id", id);
        }

        let opened = tokio::select! {
            result = self.transport.open_stream(&request) => result,
            _ = self.shutdown.changed() => return Attempt::Shutdown,
        };

        let mut response = match opened {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(error = %error, url = %request.url, "Event stream connection failed");
                return Attempt::Failed;
            }
        };

        if response.status == 204 {
            tracing::info!(url = %request.url, "Server ended the event stream");
            return Attempt::Terminal;
        }
        if !(200..300).contains(&response.status) {
            tracing::warn!(status = response.status, url = %request.url, "Event stream rejected");
            return if response.status >= 500 || response.status == 429 {
                Attempt::Failed
            } else {
                Attempt::Terminal
            };
        }
        let content_type = response
            .headers
            .get("content-type")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();
        if !content_type.starts_with("text/event-stream") {
            tracing::error!(content_type = %content_type, "Event stream has the wrong content type");
            return Attempt::Terminal;
        }

        let _ = self.state.send(EventSourceState::Open);
        tracing::info!(url = %request.url, "Event stream open");
        parser.reset();

        loop {
            let chunk = tokio::select! {
                chunk = response.body.next() => chunk,
                _ = self.shutdown.changed() => return Attempt::Shutdown,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    for event in parser.push(&bytes) {
                        if self.events.send(event).await.is_err() {
                            return Attempt::Shutdown;
                        }
                    }
                }
                Some(Err(error)) => {
                    tracing::warn!(error = %error, "Event stream interrupted");
                    return Attempt::Ended;
                }
                None => return Attempt::Ended,
            }
        }
    }
}
