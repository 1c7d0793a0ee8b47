//! Duplex transport
//!
//! A [`Transport`] opens a [`Link`]: a pair of channels standing in for one
//! socket. The owner pushes [`Outbound`] commands into the link and reads
//! [`TransportEvent`]s out of it. The transport knows nothing about messages,
//! ids or reconnection.
//!
//! The production implementation is [`WebSocketTransport`], which runs one
//! pump task per socket bridging the channels to a `tokio-tungstenite`
//! stream. Tests substitute their own transport.
//!
//! # Close codes
//!
//! [`NORMAL_CLOSURE`] (1000) marks a deliberate shutdown. Every other code,
//! including the synthetic [`ABNORMAL_CLOSURE`] (1006) reported when the
//! socket dies without a close frame, is abnormal.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use tether_core::{Error, Result};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

/// Deliberate, clean shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Socket ended without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Peer closed without giving a status code
pub const NO_STATUS_CLOSURE: u16 = 1005;

/// Local close issued after too many missed heartbeats
pub const HEARTBEAT_TIMEOUT_CLOSURE: u16 = 4000;

/// Whether a close code should drive reconnection
pub fn is_abnormal(code: u16) -> bool {
    code != NORMAL_CLOSURE
}

/// Command sent towards the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame
    Frame(String),
    /// Close the socket with the given code
    Close {
        /// Close code
        code: u16,
        /// Human-readable reason
        reason: String,
    },
}

/// Lifecycle or data event coming from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame
    Frame(String),
    /// The socket reported a problem
    Error(String),
    /// The socket is gone
    Closed {
        /// Close code reported by the peer or synthesised locally
        code: u16,
        /// Close reason, possibly empty
        reason: String,
    },
}

/// Owner-side handle to one open socket
#[derive(Debug)]
pub struct Link {
    /// Commands towards the socket
    pub outbound: mpsc::UnboundedSender<Outbound>,
    /// Events from the socket
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    /// Create a link from its two channel ends
    pub fn new(
        outbound: mpsc::UnboundedSender<Outbound>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }
}

/// Opens duplex connections
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection to `endpoint`, optionally presenting a bearer token.
    ///
    /// Returns once the handshake completed. Errors are mapped into the
    /// client taxonomy, normally `TransportUnavailable`.
    async fn open(&self, endpoint: &str, token: Option<&str>) -> Result<Link>;
}

/// WebSocket transport over `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &str, token: Option<&str>) -> Result<Link> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| map_open_error(endpoint, e))?;

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::TransportUnavailable(format!("invalid credential token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| map_open_error(endpoint, e))?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let (mut sink, mut stream) = ws_stream.split();

        tokio::spawn(async move {
            // Dropping `outbound_rx` on exit is what marks the link closed.
            loop {
                tokio::select! {
                    command = outbound_rx.recv() => match command {
                        Some(Outbound::Frame(text)) => {
                            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                                let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                                let _ = inbound_tx.send(TransportEvent::Closed {
                                    code: ABNORMAL_CLOSURE,
                                    reason: e.to_string(),
                                });
                                break;
                            }
                        }
                        Some(Outbound::Close { code, reason }) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: Cow::Owned(reason.clone()),
                            };
                            if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                                tracing::debug!(error = %e, "Close frame not delivered");
                            }
                            let _ = inbound_tx.send(TransportEvent::Closed { code, reason });
                            break;
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    incoming = stream.next() => match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            let _ = inbound_tx.send(TransportEvent::Frame(text));
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                let _ = inbound_tx.send(TransportEvent::Frame(text));
                            }
                            Err(_) => {
                                let _ = inbound_tx.send(TransportEvent::Error(
                                    "binary frame is not valid UTF-8".to_string(),
                                ));
                            }
                        },
                        Some(Ok(WsMessage::Close(frame))) => {
                            let (code, reason) = match frame {
                                Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                                None => (NO_STATUS_CLOSURE, String::new()),
                            };
                            let _ = inbound_tx.send(TransportEvent::Closed { code, reason });
                            break;
                        }
                        // Ping/pong are answered by tungstenite itself.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = inbound_tx.send(TransportEvent::Error(e.to_string()));
                            let _ = inbound_tx.send(TransportEvent::Closed {
                                code: ABNORMAL_CLOSURE,
                                reason: e.to_string(),
                            });
                            break;
                        }
                        None => {
                            let _ = inbound_tx.send(TransportEvent::Closed {
                                code: ABNORMAL_CLOSURE,
                                reason: "stream ended".to_string(),
                            });
                            break;
                        }
                    },
                }
            }
        });

        Ok(Link::new(outbound_tx, inbound_rx))
    }
}

fn map_open_error(endpoint: &str, e: tungstenite::Error) -> Error {
    match e {
        tungstenite::Error::Url(e) => {
            Error::TransportUnavailable(format!("unsupported endpoint {}: {}", endpoint, e))
        }
        tungstenite::Error::Tls(e) => {
            Error::TransportUnavailable(format!("TLS unavailable for {}: {}", endpoint, e))
        }
        other => Error::TransportUnavailable(format!("failed to open {}: {}", endpoint, other)),
    }
}
