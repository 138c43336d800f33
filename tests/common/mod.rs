//! Common test utilities for PubSub integration tests
//!
//! `MockPubSubServer` speaks enough of the PubSub protocol to drive the
//! client: it answers LISTEN with a RESPONSE, PING with PONG, and hands each
//! accepted connection to the test so it can push frames or drop it.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use redemption_bridge::ClientHandle;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;

/// How the mock answers a LISTEN request
#[derive(Clone, Debug, Default)]
pub struct ServerBehavior {
    /// Error string placed in the RESPONSE; empty means success
    pub listen_error: String,
    /// Leave PINGs unanswered
    pub silent: bool,
}

/// One accepted client connection
pub struct ServerConn {
    /// The LISTEN frame the client sent
    pub listen: Value,
    push: mpsc::UnboundedSender<Message>,
}

impl ServerConn {
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.push.send(Message::text(frame.into()));
    }

    pub fn push_reconnect(&self) {
        self.push(r#"{"type":"RECONNECT"}"#);
    }
}

/// A mock PubSub server on an ephemeral port
pub struct MockPubSubServer {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<ServerConn>,
    shutdown: Arc<Notify>,
}

impl MockPubSubServer {
    pub async fn start() -> Self {
        Self::start_with(ServerBehavior::default()).await
    }

    pub async fn start_with(behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let behavior = behavior.clone();
                                let conn_tx = conn_tx.clone();
                                let shutdown = shutdown_clone.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, behavior, conn_tx, shutdown).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_clone.notified() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            connections: conn_rx,
            shutdown,
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        behavior: ServerBehavior,
        conn_tx: mpsc::UnboundedSender<ServerConn>,
        shutdown: Arc<Notify>,
    ) {
        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };
        let (mut write, mut read) = ws_stream.split();

        let listen = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => break serde_json::from_str::<Value>(text.as_str()).unwrap_or(Value::Null),
                Some(Ok(_)) => continue,
                _ => return,
            }
        };
        let response = json!({ "type": "RESPONSE", "error": behavior.listen_error, "nonce": "" });
        if write.send(Message::text(response.to_string())).await.is_err() {
            return;
        }

        let (push_tx, mut push_rx) = mpsc::unbounded_channel();
        if conn_tx.send(ServerConn { listen, push: push_tx }).is_err() {
            return;
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if text.as_str().contains(r#""PING""#) && !behavior.silent {
                                if write.send(Message::text(r#"{"type":"PONG"}"#)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    }
                }
                outbound = push_rx.recv() => {
                    // Dropping the ServerConn drops the connection
                    let Some(frame) = outbound else { break };
                    if write.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the next subscribed connection
    pub async fn next_connection(&mut self) -> ServerConn {
        tokio::time::timeout(Duration::from_secs(5), self.connections.recv())
            .await
            .expect("client connected in time")
            .expect("server running")
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockPubSubServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A reward-redeemed MESSAGE frame as Twitch sends it
pub fn redemption_frame(channel_id: u64, title: &str) -> String {
    let message = json!({
        "type": "reward-redeemed",
        "data": {
            "timestamp": "2024-01-01T00:00:00Z",
            "redemption": {
                "id": "9203c6f0-51b6-4d1d-a9ae-8eafdb0d6d47",
                "user": { "id": "30515034", "login": "viewer", "display_name": "Viewer" },
                "channel_id": channel_id.to_string(),
                "reward": { "id": "6ef17bb2-e5ae-432e-8b3f-5ac4dd774668", "title": title, "cost": 100 },
                "status": "UNFULFILLED"
            }
        }
    });
    json!({
        "type": "MESSAGE",
        "data": {
            "topic": format!("channel-points-channel-v1.{}", channel_id),
            "message": message.to_string()
        }
    })
    .to_string()
}

/// Wait until the client is supervising a live connection
pub async fn wait_active(handle: &ClientHandle) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !handle.is_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client became active");
}
