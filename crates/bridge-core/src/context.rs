//! Connection identity.

use avb_bridge_protocol::ClientId;
use std::fmt;

/// Unique identifier for a websocket connection.
///
/// Independent of the [`ClientId`] the connection's poller presents to the
/// datastore.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{:016x}", rand::random::<u64>()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Draw a datastore client ID uniformly from the 32-bit space.
#[must_use]
pub fn random_client_id() -> ClientId {
    ClientId::new(rand::random())
}
