//! Persistent request/response client over WebSocket
//!
//! A [`Client`] keeps one duplex connection to a service open, correlates
//! each request with its response by id, delivers server-pushed
//! notifications, probes liveness with periodic heartbeats, and reconnects
//! with exponential backoff after the connection drops abnormally.
//!
//! # Core Features
//!
//! - **Request-Response**: `send` / `request` with per-request deadlines
//! - **Notifications**: per-method handlers plus a typed event stream
//! - **Heartbeat**: `system.ping` probes while connected
//! - **Auto-Reconnection**: backoff strategies, bounded attempts
//! - **Observability**: `tracing` spans and events, optional OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether_client::Client;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("ws://localhost:8080").connect().await?;
//!
//!     let reply = client
//!         .send("chat.completion", json!({"prompt": "Where is my order?"}))
//!         .await?;
//!     println!("reply: {}", reply);
//!
//!     client.on_notification("ai.model.changed", |msg| async move {
//!         println!("model changed: {:?}", msg.params);
//!     }).await;
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration From The Environment
//!
//! ```rust,no_run
//! use tether_client::{ClientBuilder, ClientConfig};
//!
//! # async fn example() -> tether_core::Result<()> {
//! let client = ClientBuilder::from_config(ClientConfig::from_env()?)
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod client_builder;
mod config;
mod connection_state;
mod correlator;
mod heartbeat;
mod metrics;
mod notification;
mod reconnect;
mod transport;

pub use client::{Client, ClientEvent};
pub use client_builder::ClientBuilder;
pub use config::ClientConfig;
pub use connection_state::{ConnectionState, ConnectionStats, ObserverId, StateCell};
pub use correlator::{Completion, IdGenerator, MessageCorrelator, PendingOperation};
pub use heartbeat::HeartbeatMonitor;
pub use metrics::ClientMetrics;
pub use notification::{NotificationFn, NotificationHandler};
pub use reconnect::{
    ExponentialBackoff, FixedDelay, NoReconnect, ReconnectionScheduler, ReconnectionStrategy,
};
pub use transport::{
    is_abnormal, Link, Outbound, Transport, TransportEvent, WebSocketTransport,
    ABNORMAL_CLOSURE, HEARTBEAT_TIMEOUT_CLOSURE, NORMAL_CLOSURE, NO_STATUS_CLOSURE,
};

pub use tether_core::{methods, Error, ErrorObject, Message, MessageId, MessageKind, Result};
