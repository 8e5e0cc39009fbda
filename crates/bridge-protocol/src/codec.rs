//! JSON codec for bridge messages.
//!
//! Inbound websocket messages are decoded into opaque JSON values and
//! outbound messages are encoded as JSON text. Payload contents are never
//! inspected or rewritten.

use serde_json::Value;
use thiserror::Error;

use crate::messages::ServerMessage;

/// Maximum inbound message size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Form field carrying the serialized update in a PATCH body.
pub const UPDATE_FIELD: &str = "json";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// Message is not valid JSON.
    #[error("Malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// Binary message is not valid UTF-8.
    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    /// Connection target does not address the datastore.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
}

/// Decode an inbound text message into an update value.
///
/// Any valid JSON document is accepted; the datastore is the authority on
/// what an update may contain.
///
/// # Errors
///
/// Returns an error if the message is too large or not valid JSON.
pub fn decode_update(text: &str) -> Result<Value, ProtocolError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Decode an inbound binary message holding UTF-8 JSON.
///
/// # Errors
///
/// Returns an error if the data is not UTF-8 or not valid JSON.
pub fn decode_update_bytes(data: &[u8]) -> Result<Value, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode_update(text)
}

/// Encode an outbound message as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &ServerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Build the form body for a datastore PATCH.
///
/// The datastore expects the update serialized as JSON in a single
/// `json` form field.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn update_form(update: &Value) -> Result<[(&'static str, String); 1], ProtocolError> {
    Ok([(UPDATE_FIELD, serde_json::to_string(update)?)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_update_object() {
        let value = decode_update(r#"{"ext/ibankDisplayOrder": "2:1:0"}"#).unwrap();
        assert_eq!(value, json!({"ext/ibankDisplayOrder": "2:1:0"}));
    }

    #[test]
    fn test_decode_update_accepts_any_json() {
        assert_eq!(decode_update("[1, 2]").unwrap(), json!([1, 2]));
        assert_eq!(decode_update("3").unwrap(), json!(3));
    }

    #[test]
    fn test_decode_malformed() {
        match decode_update("{not json") {
            Err(ProtocolError::MalformedJson(_)) => {}
            other => panic!("Expected MalformedJson error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_too_large() {
        let text = format!("\"{}\"", "a".repeat(MAX_MESSAGE_SIZE));
        match decode_update(&text) {
            Err(ProtocolError::MessageTooLarge(_)) => {}
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_bytes_invalid_utf8() {
        assert!(matches!(
            decode_update_bytes(&[0xff, 0xfe]),
            Err(ProtocolError::InvalidUtf8)
        ));
        assert_eq!(decode_update_bytes(br#"{"k":"v"}"#).unwrap(), json!({"k": "v"}));
    }

    #[test]
    fn test_update_form_field() {
        let [(field, body)] = update_form(&json!({"k": "v"})).unwrap();
        assert_eq!(field, "json");
        let decoded: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(decoded, json!({"k": "v"}));
    }

    #[test]
    fn test_encode_passes_payload_through() {
        let payload = json!({"mix/chan/0/matrix/fader": 0.5, "nested": {"a": [1, 2]}});
        let text = encode(&ServerMessage::Update(payload.clone())).unwrap();
        let decoded: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, payload);
    }
}
