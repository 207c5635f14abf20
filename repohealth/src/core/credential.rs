//! Opaque caller credential.

use std::fmt;

/// An access token supplied by the login layer.
///
/// Only collaborators look inside it. `Debug` and `Display` are redacted so
/// it cannot end up in logs or error reports by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for use in an upstream request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if no token was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_is_redacted() {
        let cred = Credential::new("ghp_secret");
        assert_eq!(format!("{cred:?}"), "Credential(***)");
        assert_eq!(cred.to_string(), "***");
        assert_eq!(cred.expose(), "ghp_secret");
    }
}
