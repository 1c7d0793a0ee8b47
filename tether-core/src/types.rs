//! Wire message types
//!
//! Every frame exchanged with the remote service is a single UTF-8 JSON
//! object of the shape:
//!
//! ```text
//! { id: string, type: "request"|"response"|"notification",
//!   method?: string, params?: object, result?: object,
//!   error?: { code: number, message: string, data?: object },
//!   timestamp: ISO-8601 string }
//! ```
//!
//! Requests and responses correlate by identical `id`. Notifications do not
//! need one.
//!
//! # Examples
//!
//! ```rust
//! use tether_core::{Message, MessageId, MessageKind};
//! use serde_json::json;
//!
//! let request = Message::request(
//!     MessageId::from("1700000000000-1"),
//!     "system.ping",
//!     Some(json!({"timestamp": 12345})),
//! );
//! assert_eq!(request.kind, MessageKind::Request);
//! assert_eq!(request.method.as_deref(), Some("system.ping"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Request method and notification names understood by the client
pub mod methods {
    /// Text-generation request
    pub const CHAT_COMPLETION: &str = "chat.completion";
    /// Health query, also broadcast by the server as a liveness notification
    pub const SYSTEM_HEALTH: &str = "system.health";
    /// Liveness probe issued by the heartbeat
    pub const SYSTEM_PING: &str = "system.ping";
    /// Server is going away; the client disconnects locally
    pub const SERVER_SHUTDOWN: &str = "server.shutdown";
    /// Informational: the backing model changed
    pub const AI_MODEL_CHANGED: &str = "ai.model.changed";
}

/// Correlation identifier linking a request to its response
///
/// Serialized as a bare JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Discriminates the three message shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Expects a correlated response
    Request,
    /// Answers a request with the same id
    Response,
    /// Fire-and-forget, never answered
    Notification,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Notification => "notification",
        };
        f.write_str(s)
    }
}

/// Error payload carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code chosen by the server
    pub code: i64,
    /// Human-readable description
    pub message: String,
    /// Optional structured detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorObject {
    /// Create an error payload without detail
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error payload with a detail value
    pub fn with_data(code: i64, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// One frame on the wire
///
/// A `Message` lives only as long as its handling: outbound messages are
/// encoded and dropped, inbound ones are routed and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id; required for requests and responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Message shape
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Method name for requests and notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Call parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Successful result of a request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure payload of a request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Creation time; frames without one are stamped on receipt
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a request
    pub fn request(
        id: MessageId,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Some(id),
            kind: MessageKind::Request,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Build a successful response
    pub fn response(id: MessageId, result: serde_json::Value) -> Self {
        Self {
            id: Some(id),
            kind: MessageKind::Response,
            method: None,
            params: None,
            result: Some(result),
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Build a failed response
    pub fn error_response(id: MessageId, error: ErrorObject) -> Self {
        Self {
            id: Some(id),
            kind: MessageKind::Response,
            method: None,
            params: None,
            result: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    /// Build a notification
    pub fn notification(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            id: None,
            kind: MessageKind::Notification,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Check if this message is a request
    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// Check if this message is a response
    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// Check if this message is a notification
    pub fn is_notification(&self) -> bool {
        self.kind == MessageKind::Notification
    }

    /// Method name, or an empty string when absent
    pub fn method_name(&self) -> &str {
        self.method.as_deref().unwrap_or_default()
    }
}
