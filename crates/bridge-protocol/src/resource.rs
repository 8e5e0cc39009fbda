//! Datastore resource addressing.

use std::fmt;

use crate::codec::ProtocolError;

/// Path prefix shared by the websocket endpoint and the upstream API.
pub const DATASTORE_PREFIX: &str = "/datastore";

/// Identifies one long-poll session on the datastore.
///
/// The datastore tracks change tokens per client, so two pollers on the same
/// server must not share an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u32);

impl ClientId {
    /// Create a client ID from a known value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClientId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A datastore sub-path. Empty means the root resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// Create a resource path, dropping any leading slashes.
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(path.as_ref().trim_start_matches('/').to_string())
    }

    /// The root resource.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Extract the resource path from a websocket target such as
    /// `/datastore/mixer/1`.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is not under [`DATASTORE_PREFIX`].
    pub fn from_target(target: &str) -> Result<Self, ProtocolError> {
        let rest = target
            .strip_prefix(DATASTORE_PREFIX)
            .ok_or_else(|| ProtocolError::InvalidTarget(target.to_string()))?;

        if !rest.is_empty() && !rest.starts_with('/') {
            return Err(ProtocolError::InvalidTarget(target.to_string()));
        }

        Ok(Self::new(rest))
    }

    /// Get the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this is the root resource.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the datastore address for a path and client.
///
/// The root resource has no sub-path segment and no trailing slash.
#[must_use]
pub fn datastore_url(base: &str, path: &ResourcePath, client: ClientId) -> String {
    let base = base.trim_end_matches('/');
    if path.is_root() {
        format!("{base}{DATASTORE_PREFIX}?client={client}")
    } else {
        format!("{base}{DATASTORE_PREFIX}/{path}?client={client}")
    }
}
