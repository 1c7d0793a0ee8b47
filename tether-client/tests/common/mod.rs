//! Common test utilities for tether-client integration tests
//!
//! A real WebSocket server on an ephemeral port, driven by a handler that
//! maps each decoded client message to an optional reply. Tests can also push
//! frames to every connection and cut connections without a close frame.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_client::{Message, MessageKind};
use tether_core::codec;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Drop,
}

/// Mock WebSocket server for client testing
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    control_tx: broadcast::Sender<Control>,
    message_rx: mpsc::Receiver<Message>,
    connections: Arc<AtomicUsize>,
    authorization: Arc<Mutex<Option<String>>>,
}

impl MockWsServer {
    /// Server answering every request with [`echo`]
    pub async fn new() -> Self {
        Self::with_handler(|msg| async move { echo(msg) }).await
    }

    /// Server answering requests with `handler`
    ///
    /// Every decoded client message is also forwarded to
    /// [`wait_for_message`](Self::wait_for_message).
    pub async fn with_handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Message>> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (control_tx, _) = broadcast::channel::<Control>(64);
        let (msg_tx, message_rx) = mpsc::channel::<Message>(100);
        let connections = Arc::new(AtomicUsize::new(0));
        let authorization = Arc::new(Mutex::new(None));

        let handler = Arc::new(handler);
        let accept_control = control_tx.clone();
        let accept_connections = Arc::clone(&connections);
        let accept_authorization = Arc::clone(&authorization);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        let _ = accept_control.send(Control::Drop);
                        break;
                    }
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let handler = Arc::clone(&handler);
                        let msg_tx = msg_tx.clone();
                        let mut control_rx = accept_control.subscribe();
                        let connections = Arc::clone(&accept_connections);
                        let authorization = Arc::clone(&accept_authorization);

                        tokio::spawn(async move {
                            let record_auth = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                                let header = req
                                    .headers()
                                    .get("authorization")
                                    .and_then(|v| v.to_str().ok())
                                    .map(str::to_string);
                                *authorization.lock().unwrap() = header;
                                Ok(resp)
                            };
                            let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, record_auth).await else {
                                return;
                            };
                            connections.fetch_add(1, Ordering::SeqCst);
                            let (mut write, mut read) = ws.split();

                            loop {
                                tokio::select! {
                                    incoming = read.next() => {
                                        let Some(Ok(frame)) = incoming else { break };
                                        let WsMessage::Text(text) = frame else { continue };
                                        let Ok(message) = codec::decode(&text) else { continue };
                                        let _ = msg_tx.send(message.clone()).await;
                                        if let Some(reply) = handler(message).await {
                                            let text = codec::encode(&reply).unwrap();
                                            if write.send(WsMessage::Text(text)).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                    control = control_rx.recv() => match control {
                                        Ok(Control::Push(text)) => {
                                            let _ = write.send(WsMessage::Text(text)).await;
                                        }
                                        // Dropping the socket without a close frame.
                                        Ok(Control::Drop) | Err(_) => break,
                                    }
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            control_tx,
            message_rx,
            connections,
            authorization,
        }
    }

    /// WebSocket URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Connections that completed the handshake so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `Authorization` header of the latest handshake
    pub fn last_authorization(&self) -> Option<String> {
        self.authorization.lock().unwrap().clone()
    }

    /// Next message received from a client, or `None` after 5 s
    pub async fn wait_for_message(&mut self) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next received message that is not a heartbeat probe
    pub async fn wait_for_method(&mut self, method: &str) -> Option<Message> {
        loop {
            let message = self.wait_for_message().await?;
            if message.method.as_deref() == Some(method) {
                return Some(message);
            }
        }
    }

    /// Send a frame to every open connection
    pub fn push(&self, message: &Message) {
        let _ = self
            .control_tx
            .send(Control::Push(codec::encode(message).unwrap()));
    }

    /// Send raw text to every open connection
    pub fn push_raw(&self, text: &str) {
        let _ = self.control_tx.send(Control::Push(text.to_string()));
    }

    /// Cut every open connection without a close handshake
    pub fn drop_connections(&self) {
        let _ = self.control_tx.send(Control::Drop);
    }

    /// Stop accepting and cut every connection
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Reply to requests with their own method and params; ignore everything else
pub fn echo(message: Message) -> Option<Message> {
    if message.kind != MessageKind::Request {
        return None;
    }
    let id = message.id.clone()?;
    let result = match message.method_name() {
        "system.ping" => serde_json::json!({ "pong": true }),
        method => serde_json::json!({ "method": method, "params": message.params }),
    };
    Some(Message::response(id, result))
}

/// TCP listener that accepts connections but never answers the handshake
pub async fn silent_listener() -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (url, task)
}

/// Poll `condition` every 10 ms for up to 5 s
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_client::MessageId;

    #[tokio::test]
    async fn test_mock_server_creation() {
        let server = MockWsServer::new().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        assert_eq!(server.connections(), 0);
        server.shutdown().await;
    }

    #[test]
    fn test_echo_only_answers_requests() {
        let request = Message::request(MessageId::from("7"), "chat.completion", None);
        let reply = echo(request).unwrap();
        assert_eq!(reply.id, Some(MessageId::from("7")));
        assert!(reply.is_response());

        assert!(echo(Message::notification("client.typing", None)).is_none());
    }
}
