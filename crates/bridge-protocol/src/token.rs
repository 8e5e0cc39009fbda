//! Change tokens for conditional polling.

use std::fmt;

/// Response header carrying the datastore's current change token.
pub const CHANGE_TOKEN_HEADER: &str = "ETag";

/// Request header asserting the last change token seen by the client.
pub const CONDITIONAL_HEADER: &str = "If-None-Match";

/// Sentinel sent before any state has been observed.
const INITIAL_TOKEN: &str = "-1";

/// The datastore's version marker for a resource.
///
/// Tokens are opaque: they are only ever copied from a response header into
/// the next request, never compared or advanced locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeToken(String);

impl ChangeToken {
    /// The "no prior state" sentinel, which makes the datastore answer with
    /// the full resource.
    #[must_use]
    pub fn initial() -> Self {
        Self(INITIAL_TOKEN.to_string())
    }

    /// Create a token from a header value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this is the initial sentinel.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.0 == INITIAL_TOKEN
    }
}

impl Default for ChangeToken {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_token() {
        let token = ChangeToken::default();
        assert!(token.is_initial());
        assert_eq!(token.to_string(), "-1");
    }

    #[test]
    fn test_token_from_header() {
        let token = ChangeToken::new("9");
        assert!(!token.is_initial());
        assert_eq!(token.as_str(), "9");
    }
}
