//! Bridge errors.

use avb_bridge_protocol::ProtocolError;
use thiserror::Error;

/// Errors raised while polling or updating the datastore.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The HTTP request could not be completed.
    #[error("Upstream request failed: {0}")]
    Transport(String),

    /// The datastore answered an update with a non-200 status.
    #[error("Upstream rejected update with status {status}")]
    UpdateRejected {
        /// HTTP status returned by the datastore.
        status: u16,
    },

    /// A poll returned a status other than 2xx or 304.
    #[error("Unexpected poll status {status}")]
    UnexpectedStatus {
        /// HTTP status returned by the datastore.
        status: u16,
    },

    /// A poll response carried no change token.
    #[error("Poll response has no change token")]
    MissingChangeToken,

    /// A poll body was not valid JSON.
    #[error("Invalid poll body: {0}")]
    Decode(#[from] serde_json::Error),

    /// A client message was not valid JSON.
    #[error("Malformed client message: {0}")]
    MalformedMessage(#[source] ProtocolError),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The poll loop was already started.
    #[error("Poll loop already started")]
    AlreadyStarted,

    /// The bridge is not open.
    #[error("Bridge is not open")]
    NotOpen,

    /// The connection's outbound channel is gone.
    #[error("Outbound channel closed")]
    SinkClosed,

    /// The poll task panicked or was cancelled.
    #[error("Poll task failed: {0}")]
    TaskFailed(String),
}

impl BridgeError {
    /// Whether the error should terminate the client connection.
    ///
    /// Rejected updates are reported but leave the connection usable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BridgeError::UpdateRejected { .. })
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        BridgeError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(!BridgeError::UpdateRejected { status: 500 }.is_fatal());
        assert!(BridgeError::Transport("connection refused".into()).is_fatal());
        assert!(BridgeError::SinkClosed.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = BridgeError::UpdateRejected { status: 404 };
        assert_eq!(err.to_string(), "Upstream rejected update with status 404");
    }
}
