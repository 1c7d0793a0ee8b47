//! Error types for tether
//!
//! Every failure a caller can observe through the client is one of the
//! variants of [`Error`]. The set is closed on purpose: transport and codec
//! failures are mapped into it at the boundary, so no `tungstenite` or
//! `serde_json` error type ever escapes the public API.
//!
//! # Error Categories
//!
//! - **Connection establishment**: `ConnectionTimeout`, `TransportUnavailable`
//! - **Per-request**: `NotConnected`, `RequestTimeout`, `ServerError`, `ClientClosed`
//! - **Wire format**: `ProtocolError`
//! - **Recovery**: `ReconnectExhausted`
//!
//! Variants tied to a specific request carry the originating method name so a
//! rejected future can always be traced back to the call that produced it.
//!
//! # Examples
//!
//! ```rust
//! use tether_core::Error;
//! use std::time::Duration;
//!
//! let error = Error::RequestTimeout {
//!     method: "system.ping".into(),
//!     timeout: Duration::from_secs(2),
//! };
//! assert_eq!(error.method(), Some("system.ping"));
//! assert_eq!(error.kind(), "request_timeout");
//! assert!(error.to_string().contains("system.ping"));
//! ```

use crate::types::ErrorObject;
use std::time::Duration;
use thiserror::Error;

/// Result type for tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the duplex client
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The open handshake did not complete within the configured deadline
    #[error("connection to {endpoint} not established within {timeout:?}")]
    ConnectionTimeout {
        /// Endpoint that was being opened
        endpoint: String,
        /// The open deadline that elapsed
        timeout: Duration,
    },

    /// The transport could not be used to reach the endpoint
    ///
    /// Covers unsupported URL schemes, unavailable TLS, refused connections
    /// and rejected upgrade handshakes.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A request was attempted while the client was not connected
    #[error("cannot send `{method}`: client is not connected")]
    NotConnected {
        /// Method of the rejected request
        method: String,
    },

    /// No matching response arrived before the request deadline
    #[error("request `{method}` timed out after {timeout:?}")]
    RequestTimeout {
        /// Method of the expired request
        method: String,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// A frame could not be encoded, or failed to parse as a well-formed message
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The remote service answered with an error payload
    #[error("request `{method}` failed with server error {}: {}", .error.code, .error.message)]
    ServerError {
        /// Method of the failed request
        method: String,
        /// Error object carried by the response
        error: ErrorObject,
    },

    /// The request was still in flight when the connection went away
    #[error("request `{method}` aborted: {reason}")]
    ClientClosed {
        /// Method of the aborted request
        method: String,
        /// Why the connection went away
        reason: String,
    },

    /// Reconnection stopped after reaching the attempt ceiling
    #[error("reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts that were made
        attempts: u32,
    },
}

impl Error {
    /// Stable, snake_case label for logs and metric attributes
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConnectionTimeout { .. } => "connection_timeout",
            Error::TransportUnavailable(_) => "transport_unavailable",
            Error::NotConnected { .. } => "not_connected",
            Error::RequestTimeout { .. } => "request_timeout",
            Error::ProtocolError(_) => "protocol_error",
            Error::ServerError { .. } => "server_error",
            Error::ClientClosed { .. } => "client_closed",
            Error::ReconnectExhausted { .. } => "reconnect_exhausted",
        }
    }

    /// Method name of the request this error belongs to, if any
    pub fn method(&self) -> Option<&str> {
        match self {
            Error::NotConnected { method }
            | Error::RequestTimeout { method, .. }
            | Error::ServerError { method, .. }
            | Error::ClientClosed { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Shorthand for a `ClientClosed` rejection
    pub fn client_closed(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ClientClosed {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a `ProtocolError`
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::ProtocolError(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ProtocolError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels_are_distinct() {
        let errors = vec![
            Error::ConnectionTimeout {
                endpoint: "ws://localhost".into(),
                timeout: Duration::from_secs(1),
            },
            Error::TransportUnavailable("no tls".into()),
            Error::NotConnected { method: "a".into() },
            Error::RequestTimeout {
                method: "a".into(),
                timeout: Duration::from_secs(1),
            },
            Error::protocol("bad frame"),
            Error::ServerError {
                method: "a".into(),
                error: ErrorObject::new(-32000, "boom"),
            },
            Error::client_closed("a", "disconnected"),
            Error::ReconnectExhausted { attempts: 3 },
        ];

        let mut kinds: Vec<_> = errors.iter().map(Error::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_method_is_carried() {
        let error = Error::client_closed("chat.completion", "client disconnected");
        assert_eq!(error.method(), Some("chat.completion"));
        assert!(error.to_string().contains("chat.completion"));

        let error = Error::ReconnectExhausted { attempts: 3 };
        assert_eq!(error.method(), None);
    }

    #[test]
    fn test_server_error_display() {
        let error = Error::ServerError {
            method: "chat.completion".into(),
            error: ErrorObject::new(503, "model overloaded"),
        };
        let text = error.to_string();
        assert!(text.contains("chat.completion"));
        assert!(text.contains("503"));
        assert!(text.contains("model overloaded"));
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: Error = err.into();
        assert_eq!(error.kind(), "protocol_error");
    }
}
