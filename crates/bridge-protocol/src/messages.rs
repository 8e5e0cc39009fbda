//! Messages pushed from the bridge to websocket clients.
//!
//! The common case is [`ServerMessage::Update`], which serializes to exactly
//! the JSON the datastore returned. Error notices are only produced when the
//! server is configured to report failed updates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of failure reported to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The datastore answered the update with a non-success status.
    UpdateRejected,
    /// The update never reached the datastore.
    UpdateFailed,
}

/// Details of a failed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Failure kind.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Upstream HTTP status, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// A message sent to a websocket client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Error envelope: `{"error": {...}}`.
    Error {
        /// The reported failure.
        error: ErrorNotice,
    },

    /// Datastore payload, passed through verbatim.
    Update(Value),
}

impl ServerMessage {
    /// Create an update message.
    #[must_use]
    pub fn update(payload: Value) -> Self {
        ServerMessage::Update(payload)
    }

    /// Create an error message.
    #[must_use]
    pub fn error(kind: ErrorKind, message: impl Into<String>, status: Option<u16>) -> Self {
        ServerMessage::Error {
            error: ErrorNotice {
                kind,
                message: message.into(),
                status,
            },
        }
    }

    /// Check if this is an error notice.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_serializes_verbatim() {
        let msg = ServerMessage::update(json!({"a": 1}));
        assert_eq!(serde_json::to_value(&msg).unwrap(), json!({"a": 1}));
        assert!(!msg.is_error());
    }

    #[test]
    fn test_error_envelope() {
        let msg = ServerMessage::error(ErrorKind::UpdateRejected, "Update rejected", Some(500));
        assert!(msg.is_error());
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"error": {"kind": "update_rejected", "message": "Update rejected", "status": 500}})
        );
    }

    #[test]
    fn test_error_without_status() {
        let msg = ServerMessage::error(ErrorKind::UpdateFailed, "connection refused", None);
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value["error"].get("status").is_none());
    }
}
