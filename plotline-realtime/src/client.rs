//! Persistent WebSocket client
//!
//! `RealtimeClient` keeps one WebSocket open to the backend and hides
//! connection loss from its callers. It provides the following:
//!
//! 1. **Connect**: `connect()` spawns a driver task that owns the socket.
//!    Calling it again while a connection is open or being opened is a no-op.
//! 2. **Reconnect**: abnormal closures (any close code other than 1000/1001,
//!    stream errors, a silent peer or a failed handshake) schedule a new
//!    attempt through the [`ReconnectionStrategy`](crate::ReconnectionStrategy).
//!    When the strategy gives up the client settles in `Disconnected` and
//!    [`terminal_error`](RealtimeClient::terminal_error) reports why.
//! 3. **Heartbeat**: a `ping` goes out every heartbeat interval and must be
//!    answered by a `pong` within the heartbeat timeout, otherwise the socket
//!    is dropped and treated as an abnormal closure. Inbound pings are
//!    answered; heartbeat traffic is never handed to subscribers.
//! 4. **Queue**: messages sent while offline wait in a FIFO queue that is
//!    flushed, in order, as soon as the next connection opens and before any
//!    newer message is written.
//! 5. **Disconnect**: `disconnect()` closes with code 1000 and cancels any
//!    scheduled reconnect. Queued messages are kept for the next `connect()`.
//!
//! # Cloning
//!
//! `RealtimeClient` is cheap to clone. Clones share the connection,
//! subscriptions and queue; the driver stops when the last clone is dropped.

use crate::client_builder::{RealtimeClientBuilder, RealtimeConfig};
use crate::connection_state::{lock, ConnectionManager, ConnectionState};
use crate::metrics::RealtimeMetrics;
use crate::reconnect::ReconnectionStrategy;
use crate::subscription::{MessageHandler, Subscription, SubscriptionRegistry};
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, StreamExt};
use plotline_core::{codec, Envelope, Error, Result, SharedClock};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketSink = SplitSink<Socket, Message>;
type SocketStream = SplitStream<Socket>;

/// Outbound messages; `live` is set while a session is accepting writes
#[derive(Default)]
struct Outbox {
    queue: VecDeque<String>,
    live: Option<mpsc::UnboundedSender<String>>,
}

/// State shared between the client handles and the driver task
struct Shared {
    url: String,
    config: RealtimeConfig,
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    outbox: Mutex<Outbox>,
    /// Active job subscriptions and how many handles hold each
    jobs: Mutex<HashMap<String, usize>>,
    terminal_error: Mutex<Option<Error>>,
    clock: SharedClock,
    metrics: Option<Arc<RealtimeMetrics>>,
}

struct Driver {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct ClientInner {
    shared: Arc<Shared>,
    driver: tokio::sync::Mutex<Option<Driver>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            let _ = driver.shutdown.send(true);
        }
    }
}

/// How a connection session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// `disconnect()` was called
    Manual,
    /// The server closed with 1000 or 1001
    Normal,
    /// Anything that should trigger a reconnect
    Abnormal,
}

/// Reconnecting WebSocket client with subscriptions and an outbound queue
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    /// Client for `url` with default settings; call [`connect`](Self::connect) to open it
    pub fn new(url: impl Into<String>) -> Result<Self> {
        RealtimeClientBuilder::new(url).build()
    }

    pub fn builder(url: impl Into<String>) -> RealtimeClientBuilder {
        RealtimeClientBuilder::new(url)
    }

    pub(crate) fn from_parts(
        url: String,
        config: RealtimeConfig,
        strategy: Box<dyn ReconnectionStrategy>,
        clock: SharedClock,
        metrics: Option<Arc<RealtimeMetrics>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            url,
            config,
            connection: ConnectionManager::new(strategy),
            registry: SubscriptionRegistry::new(),
            outbox: Mutex::new(Outbox::default()),
            jobs: Mutex::new(HashMap::new()),
            terminal_error: Mutex::new(None),
            clock,
            metrics,
        });
        Self {
            inner: Arc::new(ClientInner {
                shared,
                driver: tokio::sync::Mutex::new(None),
            }),
        }
    }

    fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    /// Open the connection
    ///
    /// Resolves once the first handshake finishes. If it fails the error is
    /// returned while the client keeps retrying in the background according
    /// to its reconnection strategy.
    #[tracing::instrument(skip(self), fields(url = %self.inner.shared.url))]
    pub async fn connect(&self) -> Result<()> {
        let shared = self.shared().clone();
        let ready = {
            let mut driver = self.inner.driver.lock().await;
            if let Some(existing) = driver.as_ref() {
                if !existing.handle.is_finished() {
                    tracing::debug!("Connection already open or opening");
                    return Ok(());
                }
            }

            *lock(&shared.terminal_error) = None;
            shared.connection.reset_attempts();
            shared.set_state(ConnectionState::Reconnecting);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (ready_tx, ready_rx) = oneshot::channel();
            let handle = tokio::spawn(run_driver(shared, shutdown_rx, ready_tx));
            *driver = Some(Driver {
                shutdown: shutdown_tx,
                handle,
            });
            ready_rx
        };

        ready.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Close the connection and cancel any scheduled reconnect
    pub async fn disconnect(&self) {
        let driver = self.inner.driver.lock().await.take();
        if let Some(driver) = driver {
            let _ = driver.shutdown.send(true);
            if let Err(error) = driver.handle.await {
                tracing::error!(error = %error, "Connection driver failed");
            }
        }
        self.shared().set_state(ConnectionState::Disconnected);
    }

    /// Send an envelope, or queue it until the connection is open
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.shared().send(envelope)
    }

    /// Send `{"type": kind, "payload": payload}`
    pub fn send_message<T: Serialize + ?Sized>(&self, kind: &str, payload: &T) -> Result<()> {
        let payload = serde_json::to_value(payload)?;
        self.send(&Envelope::new(kind).with_payload(payload))
    }

    /// Call `handler` for every message of type `kind`; `"*"` matches all types
    pub fn subscribe<F>(&self, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let kind = kind.into();
        let id = self.shared().registry.register(kind.clone(), Arc::new(handler));
        let shared = Arc::downgrade(self.shared());
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.registry.unregister(&kind, id);
            }
        })
    }

    /// Call `handler` for progress, completion and error messages of one job
    ///
    /// The first subscription to a job sends a `subscribe` control message;
    /// releasing the last one sends `unsubscribe`. Active jobs are announced
    /// again after every reconnect.
    pub fn subscribe_to_job<F>(&self, job_id: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let job_id = job_id.into();
        let shared = self.shared();
        let handler: MessageHandler = Arc::new(handler);

        let registrations: Vec<(&'static str, u64)> = codec::JOB_EVENT_TYPES
            .iter()
            .map(|kind| {
                let handler = handler.clone();
                let wanted = job_id.clone();
                let id = shared.registry.register(
                    *kind,
                    Arc::new(move |envelope: &Envelope| {
                        if envelope.job_id.as_deref() == Some(wanted.as_str()) {
                            handler(envelope);
                        }
                    }),
                );
                (*kind, id)
            })
            .collect();

        let first = {
            let mut jobs = lock(&shared.jobs);
            let holders = jobs.entry(job_id.clone()).or_insert(0);
            *holders += 1;
            *holders == 1
        };
        if first {
            tracing::debug!(job_id = %job_id, "Subscribing to job");
            shared.send_control(codec::subscribe(&job_id));
        }

        let weak = Arc::downgrade(shared);
        Subscription::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            for (kind, id) in registrations {
                shared.registry.unregister(kind, id);
            }
            let last = {
                let mut jobs = lock(&shared.jobs);
                match jobs.get_mut(&job_id) {
                    Some(holders) if *holders > 1 => {
                        *holders -= 1;
                        false
                    }
                    Some(_) => {
                        jobs.remove(&job_id);
                        true
                    }
                    None => false,
                }
            };
            if last {
                tracing::debug!(job_id = %job_id, "Unsubscribing from job");
                shared.send_control(codec::unsubscribe(&job_id));
            }
        })
    }

    /// Call `listener` on every connection state change
    pub fn on_connection_state_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.shared().connection.add_listener(Arc::new(listener));
        let shared = Arc::downgrade(self.shared());
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.connection.remove_listener(id);
            }
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared().connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Wait until the connection reaches `state`
    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut receiver = self.shared().connection.watch();
        let _ = receiver.wait_for(|current| *current == state).await;
    }

    /// Messages waiting for a connection
    pub fn queued_len(&self) -> usize {
        lock(&self.shared().outbox).queue.len()
    }

    /// Why the client stopped reconnecting, if it gave up
    pub fn terminal_error(&self) -> Option<Error> {
        lock(&self.shared().terminal_error).clone()
    }

    /// Jobs with at least one active subscription
    pub fn active_jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = lock(&self.shared().jobs).keys().cloned().collect();
        jobs.sort();
        jobs
    }

    pub fn url(&self) -> &str {
        &self.shared().url
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        if self.connection.set_state(state) {
            if let Some(metrics) = &self.metrics {
                metrics.update_connection_state(state);
            }
        }
    }

    fn send(&self, envelope: &Envelope) -> Result<()> {
        let text = codec::encode_envelope(envelope)?;
        self.enqueue(text);
        Ok(())
    }

    fn send_control(&self, envelope: Envelope) {
        if let Err(error) = self.send(&envelope) {
            tracing::error!(kind = %envelope.kind, error = %error, "Failed to encode control message");
        }
    }

    /// Hand `text` to the live session, or queue it
    fn enqueue(&self, text: String) {
        let mut outbox = lock(&self.outbox);
        let text = match &outbox.live {
            Some(live) => match live.send(text) {
                Ok(()) => return,
                Err(mpsc::error::SendError(text)) => text,
            },
            None => text,
        };
        outbox.queue.push_back(text);
        tracing::debug!(queued = outbox.queue.len(), "Connection not open, message queued");
        if let Some(metrics) = &self.metrics {
            metrics.record_queued();
        }
    }

    async fn open_socket(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Option<Socket>> {
        tracing::info!(url = %self.url, "Connecting to server");
        let timeout = self.clock.sleep(self.config.connect_timeout);
        tokio::select! {
            result = connect_async(self.url.as_str()) => result
                .map(|(socket, _)| Some(socket))
                .map_err(|e| Error::WebSocket(e.to_string())),
            _ = timeout => Err(Error::WebSocket(format!(
                "handshake timed out after {}ms",
                self.config.connect_timeout.as_millis()
            ))),
            _ = shutdown.changed() => Ok(None),
        }
    }

    async fn run_session(
        &self,
        socket: Socket,
        shutdown: &mut watch::Receiver<bool>,
        ready: &mut Option<oneshot::Sender<Result<()>>>,
    ) -> SessionEnd {
        let (mut write, mut read) = socket.split();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();

        let batch: VecDeque<String> = {
            let mut outbox = lock(&self.outbox);
            outbox.live = Some(live_tx);
            outbox.queue.drain(..).collect()
        };

        let reconnected = self.connection.attempts() > 0;
        self.connection.connected();
        if let Some(metrics) = &self.metrics {
            metrics.update_connection_state(ConnectionState::Connected);
            if reconnected {
                metrics.record_reconnection_success();
            }
        }
        tracing::info!(url = %self.url, queued = batch.len(), "Connected");
        if let Some(ready) = ready.take() {
            let _ = ready.send(Ok(()));
        }

        let mut unsent = VecDeque::new();
        let end = self
            .session_loop(&mut write, &mut read, &mut live_rx, batch, &mut unsent, shutdown)
            .await;

        // Whatever did not reach the socket goes back to the front of the queue
        {
            let mut outbox = lock(&self.outbox);
            outbox.live = None;
            while let Ok(text) = live_rx.try_recv() {
                unsent.push_back(text);
            }
            unsent.extend(outbox.queue.drain(..));
            outbox.queue = unsent;
        }

        end
    }

    async fn session_loop(
        &self,
        write: &mut SocketSink,
        read: &mut SocketStream,
        live_rx: &mut mpsc::UnboundedReceiver<String>,
        mut batch: VecDeque<String>,
        unsent: &mut VecDeque<String>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let flushed_jobs: HashSet<String> = batch
            .iter()
            .filter_map(|text| codec::decode_envelope(text).ok())
            .filter(|envelope| envelope.kind == codec::SUBSCRIBE)
            .filter_map(|envelope| envelope.job_id)
            .collect();

        let mut pong_deadline: Option<BoxFuture<'static, ()>> = None;

        while let Some(text) = batch.pop_front() {
            let sent =
                send_within_deadline(write, Message::Text(text.clone()), &mut pong_deadline).await;
            if let Err(failure) = sent {
                self.write_failed("queued", failure);
                unsent.push_back(text);
                unsent.extend(batch);
                return SessionEnd::Abnormal;
            }
            self.record_sent("queued");
        }

        let announce: Vec<String> = lock(&self.jobs)
            .keys()
            .filter(|job| !flushed_jobs.contains(*job))
            .cloned()
            .collect();
        for job_id in announce {
            tracing::debug!(job_id = %job_id, "Re-announcing job subscription");
            if !self
                .write_envelope(write, &codec::subscribe(&job_id), &mut pong_deadline)
                .await
            {
                return SessionEnd::Abnormal;
            }
        }

        let heartbeat = self.config.heartbeat_interval;
        let mut next_ping: BoxFuture<'static, ()> = if heartbeat.is_zero() {
            Box::pin(std::future::pending())
        } else {
            self.clock.sleep(heartbeat)
        };

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    let _ = write.close().await;
                    return SessionEnd::Manual;
                }
                Some(text) = live_rx.recv() => {
                    let sent =
                        send_within_deadline(write, Message::Text(text.clone()), &mut pong_deadline)
                            .await;
                    if let Err(failure) = sent {
                        self.write_failed("live", failure);
                        unsent.push_back(text);
                        return SessionEnd::Abnormal;
                    }
                    self.record_sent("live");
                }
                _ = &mut next_ping => {
                    if pong_deadline.is_none() {
                        pong_deadline = Some(self.clock.sleep(self.config.heartbeat_timeout));
                    }
                    if !self.write_envelope(write, &codec::ping(), &mut pong_deadline).await {
                        return SessionEnd::Abnormal;
                    }
                    next_ping = self.clock.sleep(heartbeat);
                }
                _ = wait_deadline(&mut pong_deadline) => {
                    self.heartbeat_timed_out();
                    return SessionEnd::Abnormal;
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let envelope = match codec::decode_envelope(&text) {
                            Ok(envelope) => envelope,
                            Err(error) => {
                                tracing::warn!(error = %error, "Dropping malformed message");
                                continue;
                            }
                        };
                        if let Some(metrics) = &self.metrics {
                            metrics.record_received(&envelope.kind);
                        }
                        match envelope.kind.as_str() {
                            codec::PONG => pong_deadline = None,
                            codec::PING => {
                                if !self.write_envelope(write, &codec::pong(), &mut pong_deadline).await {
                                    return SessionEnd::Abnormal;
                                }
                            }
                            _ => {
                                self.registry.dispatch(&envelope);
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|frame| frame.code);
                        tracing::info!(code = ?code, "Server closed the connection");
                        return match code {
                            Some(CloseCode::Normal) | Some(CloseCode::Away) => SessionEnd::Normal,
                            _ => SessionEnd::Abnormal,
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::warn!(error = %error, "Connection error");
                        if let Some(metrics) = &self.metrics {
                            metrics.record_error("stream");
                        }
                        return SessionEnd::Abnormal;
                    }
                    None => {
                        tracing::warn!("Connection ended without a close frame");
                        return SessionEnd::Abnormal;
                    }
                },
            }
        }
    }

    async fn write_envelope(
        &self,
        write: &mut SocketSink,
        envelope: &Envelope,
        pong_deadline: &mut Option<BoxFuture<'static, ()>>,
    ) -> bool {
        let text = match codec::encode_envelope(envelope) {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(kind = %envelope.kind, error = %error, "Failed to encode message");
                return true;
            }
        };
        match send_within_deadline(write, Message::Text(text), pong_deadline).await {
            Ok(()) => {
                self.record_sent(&envelope.kind);
                true
            }
            Err(failure) => {
                self.write_failed(&envelope.kind, failure);
                false
            }
        }
    }

    fn write_failed<E: std::fmt::Display>(&self, kind: &str, failure: WriteFailure<E>) {
        match failure {
            WriteFailure::Sink(error) => {
                tracing::warn!(kind = %kind, error = %error, "Failed to write message");
            }
            WriteFailure::HeartbeatTimeout => self.heartbeat_timed_out(),
        }
    }

    fn heartbeat_timed_out(&self) {
        tracing::warn!(
            timeout_ms = self.config.heartbeat_timeout.as_millis() as u64,
            "Heartbeat timed out, dropping connection"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_heartbeat_timeout();
        }
    }

    fn record_sent(&self, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_sent(kind);
        }
    }
}

enum WriteFailure<E> {
    Sink(E),
    /// The pong deadline passed while the write was pending
    HeartbeatTimeout,
}

/// Send one frame unless the pong deadline passes first
async fn send_within_deadline<S>(
    sink: &mut S,
    message: Message,
    pong_deadline: &mut Option<BoxFuture<'static, ()>>,
) -> std::result::Result<(), WriteFailure<S::Error>>
where
    S: Sink<Message> + Unpin,
{
    tokio::select! {
        sent = sink.send(message) => sent.map_err(WriteFailure::Sink),
        _ = wait_deadline(pong_deadline) => Err(WriteFailure::HeartbeatTimeout),
    }
}

async fn wait_deadline(deadline: &mut Option<BoxFuture<'static, ()>>) {
    match deadline {
        Some(deadline) => deadline.await,
        None => std::future::pending().await,
    }
}

async fn run_driver(
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut ready = Some(ready);

    loop {
        if *shutdown.borrow() {
            break;
        }
        shared.set_state(ConnectionState::Reconnecting);

        let end = match shared.open_socket(&mut shutdown).await {
            Ok(Some(socket)) => shared.run_session(socket, &mut shutdown, &mut ready).await,
            Ok(None) => SessionEnd::Manual,
            Err(error) => {
                tracing::warn!(url = %shared.url, error = %error, "Connection attempt failed");
                if let Some(metrics) = &shared.metrics {
                    metrics.record_error("handshake");
                }
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Err(error));
                }
                SessionEnd::Abnormal
            }
        };

        match end {
            SessionEnd::Manual => {
                tracing::info!(url = %shared.url, "Connection closed by client");
                break;
            }
            SessionEnd::Normal => break,
            SessionEnd::Abnormal => {
                if *shutdown.borrow() {
                    break;
                }
                let Some((attempt, delay)) = shared.connection.next_reconnect_delay() else {
                    let attempts = shared.connection.attempts();
                    tracing::error!(url = %shared.url, attempts, "Reconnection abandoned");
                    *lock(&shared.terminal_error) = Some(Error::ReconnectExhausted { attempts });
                    break;
                };

                shared.set_state(ConnectionState::Reconnecting);
                if let Some(metrics) = &shared.metrics {
                    metrics.record_reconnection_attempt();
                }
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

                let sleep = shared.clock.sleep(delay);
                tokio::select! {
                    _ = sleep => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    shared.set_state(ConnectionState::Disconnected);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn client() -> RealtimeClient {
        RealtimeClient::new("ws://127.0.0.1:9").unwrap()
    }

    fn queued(client: &RealtimeClient) -> Vec<Envelope> {
        lock(&client.shared().outbox)
            .queue
            .iter()
            .map(|text| codec::decode_envelope(text).unwrap())
            .collect()
    }

    #[test]
    fn test_messages_queue_while_disconnected() {
        let client = client();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.send(&Envelope::new("graph_edit").with_payload(json!({"n": 1}))).unwrap();
        client.send_message("graph_edit", &json!({"n": 2})).unwrap();

        assert_eq!(client.queued_len(), 2);
        let payloads: Vec<_> = queued(&client).into_iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec![Some(json!({"n": 1})), Some(json!({"n": 2}))]);
    }

    #[test]
    fn test_job_subscription_control_messages_are_refcounted() {
        let client = client();

        let first = client.subscribe_to_job("job-1", |_| {});
        let second = client.subscribe_to_job("job-1", |_| {});
        assert_eq!(client.active_jobs(), vec!["job-1".to_string()]);

        first.unsubscribe();
        assert_eq!(client.active_jobs(), vec!["job-1".to_string()]);
        second.unsubscribe();
        assert!(client.active_jobs().is_empty());

        let kinds: Vec<(String, Option<String>)> = queued(&client)
            .into_iter()
            .map(|e| (e.kind, e.job_id))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("subscribe".to_string(), Some("job-1".to_string())),
                ("unsubscribe".to_string(), Some("job-1".to_string())),
            ]
        );
    }

    #[test]
    fn test_job_handler_filters_by_job_id() {
        let client = client();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let subscription = client.subscribe_to_job("job-1", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let registry = &client.shared().registry;
        registry.dispatch(&Envelope::new("job_progress").with_job("job-1"));
        registry.dispatch(&Envelope::new("job_complete").with_job("job-1"));
        registry.dispatch(&Envelope::new("job_progress").with_job("job-2"));
        registry.dispatch(&Envelope::new("job_error"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        registry.dispatch(&Envelope::new("job_error").with_job("job-1"));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(registry.kinds().is_empty());
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let client = client();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let subscription = client.subscribe("graph_updated", move |envelope| {
            assert_eq!(envelope.kind, "graph_updated");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let registry = &client.shared().registry;
        registry.dispatch(&Envelope::new("graph_updated"));
        subscription.unsubscribe();
        registry.dispatch(&Envelope::new("graph_updated"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_listener_disposer() {
        let client = client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let subscription = client.on_connection_state_change(move |state| {
            recorder.lock().unwrap().push(state);
        });

        client.shared().set_state(ConnectionState::Reconnecting);
        subscription.unsubscribe();
        client.shared().set_state(ConnectionState::Connected);

        assert_eq!(*seen.lock().unwrap(), vec![ConnectionState::Reconnecting]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_write_gives_up_at_pong_deadline() {
        // a zero-capacity channel with a live receiver never finishes flushing
        let (mut sink, _rx) = futures::channel::mpsc::channel::<Message>(0);
        let mut deadline: Option<BoxFuture<'static, ()>> =
            Some(Box::pin(tokio::time::sleep(Duration::from_secs(1))));

        let started = tokio::time::Instant::now();
        let result = send_within_deadline(&mut sink, Message::Text("ping".into()), &mut deadline).await;

        assert!(matches!(result, Err(WriteFailure::HeartbeatTimeout)));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_write_ignores_pending_deadline() {
        let mut sink = futures::sink::drain();
        let mut deadline: Option<BoxFuture<'static, ()>> =
            Some(Box::pin(tokio::time::sleep(Duration::from_secs(1))));

        let result = send_within_deadline(&mut sink, Message::Text("ping".into()), &mut deadline).await;
        assert!(result.is_ok());

        let mut none = None;
        assert!(send_within_deadline(&mut sink, Message::Text("pong".into()), &mut none)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let client = client();
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.terminal_error().is_none());
    }
}
