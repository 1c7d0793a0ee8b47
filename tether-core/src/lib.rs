//! Core types and codec for tether
//!
//! tether is a client for services that speak a small JSON message protocol
//! over a persistent WebSocket: requests correlated to responses by id, plus
//! server-pushed notifications. This crate holds the transport-agnostic parts:
//!
//! - **Types**: the wire [`Message`] and its pieces
//! - **Codec**: encoding and schema-validating decoding of text frames
//! - **Error handling**: the closed [`Error`] taxonomy every caller sees
//! - **Observability**: `tracing` subscriber and OpenTelemetry bootstrap
//!
//! # Example
//!
//! ```rust
//! use tether_core::{codec, Message, MessageId};
//! use serde_json::json;
//!
//! let request = Message::request(MessageId::from("1"), "chat.completion", Some(json!({"prompt": "hello"})));
//! let json = codec::encode(&request).unwrap();
//!
//! let decoded = codec::decode(&json).unwrap();
//! assert_eq!(decoded.method.as_deref(), Some("chat.completion"));
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{methods, ErrorObject, Message, MessageId, MessageKind};
