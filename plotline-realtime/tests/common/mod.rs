//! Common test utilities for plotline-realtime integration tests
//!
//! A mock WebSocket server on a random local port. It records every text
//! frame it receives, answers pings unless told otherwise and lets a test
//! push messages, close connections with a given code or drop them without
//! a closing handshake.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone)]
enum Command {
    Push(String),
    Close(u16),
    Drop,
}

#[derive(Default)]
struct Recorded {
    messages: Mutex<Vec<String>>,
    close_codes: Mutex<Vec<u16>>,
    connections: AtomicUsize,
    open: AtomicUsize,
}

/// Mock WebSocket server for client testing
pub struct MockWsServer {
    addr: SocketAddr,
    recorded: Arc<Recorded>,
    auto_pong: Arc<AtomicBool>,
    commands: broadcast::Sender<Command>,
    task: JoinHandle<()>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Recorded::default());
        let auto_pong = Arc::new(AtomicBool::new(true));
        let (commands, _) = broadcast::channel(64);

        let task = {
            let recorded = recorded.clone();
            let auto_pong = auto_pong.clone();
            let commands = commands.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let recorded = recorded.clone();
                    let auto_pong = auto_pong.clone();
                    let mut commands = commands.subscribe();
                    tokio::spawn(async move {
                        let Ok(socket) = accept_async(stream).await else {
                            return;
                        };
                        recorded.connections.fetch_add(1, Ordering::SeqCst);
                        recorded.open.fetch_add(1, Ordering::SeqCst);
                        let (mut write, mut read) = socket.split();

                        loop {
                            tokio::select! {
                                incoming = read.next() => match incoming {
                                    Some(Ok(Message::Text(text))) => {
                                        let is_ping = serde_json::from_str::<Value>(&text)
                                            .map(|value| value["type"] == "ping")
                                            .unwrap_or(false);
                                        recorded.messages.lock().unwrap().push(text);
                                        if is_ping && auto_pong.load(Ordering::SeqCst) {
                                            let pong = serde_json::json!({"type": "pong"}).to_string();
                                            let _ = write.send(Message::Text(pong)).await;
                                        }
                                    }
                                    Some(Ok(Message::Close(frame))) => {
                                        if let Some(frame) = frame {
                                            recorded.close_codes.lock().unwrap().push(u16::from(frame.code));
                                        }
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(_)) | None => break,
                                },
                                command = commands.recv() => match command {
                                    Ok(Command::Push(text)) => {
                                        let _ = write.send(Message::Text(text)).await;
                                    }
                                    Ok(Command::Close(code)) => {
                                        let frame = CloseFrame {
                                            code: CloseCode::from(code),
                                            reason: "test".into(),
                                        };
                                        let _ = write.send(Message::Close(Some(frame))).await;
                                        break;
                                    }
                                    Ok(Command::Drop) | Err(_) => break,
                                },
                            }
                        }
                        recorded.open.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            addr,
            recorded,
            auto_pong,
            commands,
            task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Stop answering pings
    pub fn set_auto_pong(&self, enabled: bool) {
        self.auto_pong.store(enabled, Ordering::SeqCst);
    }

    /// Send a message to every open connection
    pub fn push(&self, message: Value) {
        let _ = self.commands.send(Command::Push(message.to_string()));
    }

    /// Close every open connection with `code`
    pub fn close_all(&self, code: u16) {
        let _ = self.commands.send(Command::Close(code));
    }

    /// Drop every open connection without a closing handshake
    pub fn drop_connections(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    /// Connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.recorded.connections.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.recorded.open.load(Ordering::SeqCst)
    }

    /// Every text frame received, decoded as JSON
    pub fn received(&self) -> Vec<Value> {
        self.recorded
            .messages
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    /// Received messages of the given type
    pub fn received_of(&self, kind: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|message| message["type"] == kind)
            .collect()
    }

    /// Close codes sent by clients
    pub fn close_codes(&self) -> Vec<u16> {
        self.recorded.close_codes.lock().unwrap().clone()
    }

    pub async fn wait_for_connections(&self, count: usize) {
        eventually(|| self.connection_count() >= count).await;
        // let the client side finish its own bookkeeping
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.task.abort();
        let _ = self.commands.send(Command::Drop);
    }
}

/// Wait up to five seconds for `condition` to hold
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met within 5s");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Address nothing is listening on
pub async fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}/ws", addr)
}
