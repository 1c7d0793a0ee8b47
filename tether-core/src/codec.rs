//! Codec for wire messages
//!
//! Serde handles the JSON mapping; this module adds the structural checks
//! serde cannot express on its own:
//!
//! - requests carry an `id` and a `method`
//! - responses carry an `id` and at most one of `result` / `error`
//! - notifications carry a `method`
//!
//! Anything else is a [`Error::ProtocolError`]. Callers on the receive path
//! log and discard such frames; they are never fatal.
//!
//! # Examples
//!
//! ```rust
//! use tether_core::{codec, Message, MessageId};
//!
//! let request = Message::request(MessageId::from("1"), "system.health", None);
//! let text = codec::encode(&request).unwrap();
//!
//! let decoded = codec::decode(&text).unwrap();
//! assert!(decoded.is_request());
//! ```

use crate::error::{Error, Result};
use crate::types::{Message, MessageKind};

/// Encode a message to a text frame
pub fn encode(msg: &Message) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::protocol(format!("failed to encode frame: {}", e)))
}

/// Decode and validate a text frame
pub fn decode(data: &str) -> Result<Message> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| Error::protocol(format!("frame is not valid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(Error::protocol("frame is not a JSON object"));
    }

    let msg: Message = serde_json::from_value(value)
        .map_err(|e| Error::protocol(format!("frame does not match the message schema: {}", e)))?;

    validate(&msg)?;
    Ok(msg)
}

/// Check the per-kind field requirements
pub fn validate(msg: &Message) -> Result<()> {
    match msg.kind {
        MessageKind::Request => {
            if msg.id.is_none() {
                return Err(Error::protocol("request without id"));
            }
            if msg.method.is_none() {
                return Err(Error::protocol("request without method"));
            }
        }
        MessageKind::Response => {
            if msg.id.is_none() {
                return Err(Error::protocol("response without id"));
            }
            if msg.result.is_some() && msg.error.is_some() {
                return Err(Error::protocol("response carries both result and error"));
            }
        }
        MessageKind::Notification => {
            if msg.method.is_none() {
                return Err(Error::protocol("notification without method"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorObject, MessageId};
    use serde_json::json;

    #[test]
    fn test_encode_decode_request() {
        let request = Message::request(MessageId::from("1-1"), "chat.completion", Some(json!({"prompt": "hi"})));
        let text = encode(&request).unwrap();
        let decoded = decode(&text).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_decode_error_response() {
        let response = Message::error_response(MessageId::from("9"), ErrorObject::new(-1, "nope"));
        let decoded = decode(&encode(&response).unwrap()).unwrap();
        assert!(decoded.is_response());
        assert_eq!(decoded.error.unwrap().message, "nope");
    }

    #[test]
    fn test_decode_invalid_json() {
        let err = decode("{this is not json").unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[test]
    fn test_decode_non_object() {
        assert!(matches!(decode("[1, 2, 3]"), Err(Error::ProtocolError(_))));
        assert!(matches!(decode("\"hello\""), Err(Error::ProtocolError(_))));
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = decode(r#"{"id":"1","type":"query","method":"x"}"#).unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[test]
    fn test_decode_missing_type() {
        let err = decode(r#"{"id":"1","result":{}}"#).unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }

    #[test]
    fn test_response_requires_id() {
        let err = decode(r#"{"type":"response","result":{"ok":true}}"#).unwrap_err();
        assert!(err.to_string().contains("response without id"));
    }

    #[test]
    fn test_response_rejects_result_and_error() {
        let text = r#"{"id":"1","type":"response","result":{},"error":{"code":1,"message":"x"}}"#;
        assert!(decode(text).is_err());
    }

    #[test]
    fn test_notification_requires_method() {
        assert!(decode(r#"{"type":"notification","params":{}}"#).is_err());
        assert!(decode(r#"{"type":"notification","method":"server.shutdown"}"#).is_ok());
    }

    #[test]
    fn test_request_requires_method() {
        assert!(decode(r#"{"id":"1","type":"request"}"#).is_err());
    }
}
