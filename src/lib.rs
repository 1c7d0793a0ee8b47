//! tether: a persistent request/response client over WebSocket
//!
//! This is the convenience crate that re-exports the tether sub-crates.
//! Use it if you want a single dependency.
//!
//! # Architecture
//!
//! - **tether-core**: wire types, codec, error taxonomy, observability bootstrap
//! - **tether-client**: transport, correlation, heartbeat, reconnection and the
//!   [`Client`] tying them together
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tether::{Client, ClientEvent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder("ws://localhost:8080")
//!         .token("secret")
//!         .connect()
//!         .await?;
//!
//!     let mut events = client.events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let ClientEvent::StateChanged(state) = event {
//!                 println!("connection is now {}", state);
//!             }
//!         }
//!     });
//!
//!     let reply = client
//!         .send("chat.completion", json!({"prompt": "Do you deliver on Sundays?"}))
//!         .await?;
//!     println!("{}", reply);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub use tether_client as client;
pub use tether_core as core;

pub use tether_client::{
    Client, ClientBuilder, ClientConfig, ClientEvent, ConnectionState, ConnectionStats,
};
pub use tether_core::{methods, Error, Message, ObservabilityConfig, Result};
