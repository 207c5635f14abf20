//! Repository keys and their filesystem form.

use crate::errors::RepoHealthError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::LazyLock;

/// Maximum accepted key length in bytes.
pub const MAX_KEY_LEN: usize = 256;

/// Maximum length of the readable part of [`RepoKey::storage_component`].
const STORAGE_PREFIX_LEN: usize = 100;

#[allow(clippy::expect_used)]
static SLUG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.\-]+/[A-Za-z0-9_.\-]+$").expect("slug pattern is valid")
});

/// Identifies one unit of deduplicated work, e.g. `"owner/name"`.
///
/// The key itself is opaque and is kept exactly as given: surrounding
/// whitespace is rejected rather than trimmed, so two spellings can never
/// name the same job. [`RepoKey::storage_component`] gives the escaped form
/// used for on-disk storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoKey(String);

impl RepoKey {
    /// Parses a key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for empty, overlong or control-character keys,
    /// and for keys with leading or trailing whitespace.
    pub fn parse(raw: impl Into<String>) -> Result<Self, RepoHealthError> {
        let raw = raw.into();

        if raw.trim().is_empty() {
            return Err(RepoHealthError::InvalidKey("key is empty".to_string()));
        }
        if raw.trim() != raw {
            return Err(RepoHealthError::InvalidKey(
                "key has leading or trailing whitespace".to_string(),
            ));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(RepoHealthError::InvalidKey(format!(
                "key is longer than {MAX_KEY_LEN} bytes"
            )));
        }
        if raw.chars().any(char::is_control) {
            return Err(RepoHealthError::InvalidKey(
                "key contains control characters".to_string(),
            ));
        }

        Ok(Self(raw))
    }

    /// Returns the key as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key looks like a GitHub `owner/name` slug.
    #[must_use]
    pub fn is_slug(&self) -> bool {
        SLUG.is_match(&self.0)
    }

    /// Splits a slug into `(owner, name)`.
    #[must_use]
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        if self.is_slug() {
            self.0.split_once('/')
        } else {
            None
        }
    }

    /// Returns a single path component unique to this key.
    ///
    /// Bytes outside `[A-Za-z0-9._-]` become `_`, the readable part is cut
    /// to 100 characters, and a short digest of the raw key is appended so
    /// `a/b` and `a_b` never collide. The result always fits a filename.
    #[must_use]
    pub fn storage_component(&self) -> String {
        let escaped: String = self
            .0
            .chars()
            .take(STORAGE_PREFIX_LEN)
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        // "." and ".." must never reach the filesystem as-is.
        let escaped = escaped.trim_start_matches('.');

        let digest = Sha256::digest(self.0.as_bytes());
        format!("{escaped}-{}", hex::encode(&digest[..4]))
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RepoKey {
    type Error = RepoHealthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RepoKey> for String {
    fn from(key: RepoKey) -> Self {
        key.0
    }
}

impl std::str::FromStr for RepoKey {
    type Err = RepoHealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_key_verbatim() {
        let key = RepoKey::parse("acme/widgets").unwrap();
        assert_eq!(key.as_str(), "acme/widgets");
        assert_eq!(key.to_string(), "acme/widgets");
    }

    #[test]
    fn test_parse_rejects_surrounding_whitespace() {
        assert!(matches!(
            RepoKey::parse(" acme/widgets"),
            Err(RepoHealthError::InvalidKey(_))
        ));
        assert!(RepoKey::parse("acme/widgets ").is_err());
        assert!(RepoKey::parse("acme widgets").is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_keys() {
        assert!(RepoKey::parse("").is_err());
        assert!(RepoKey::parse("   ").is_err());
        assert!(RepoKey::parse("a/b\n").is_err());
        assert!(RepoKey::parse("a/\u{0}b").is_err());
        assert!(RepoKey::parse("x".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_slug_detection() {
        assert!(RepoKey::parse("acme/widgets").unwrap().is_slug());
        assert!(RepoKey::parse("my-org/my.repo_2").unwrap().is_slug());
        assert!(!RepoKey::parse("acme").unwrap().is_slug());
        assert!(!RepoKey::parse("a/b/c").unwrap().is_slug());
        assert_eq!(
            RepoKey::parse("acme/widgets").unwrap().owner_and_name(),
            Some(("acme", "widgets"))
        );
    }

    #[test]
    fn test_storage_component_is_single_safe_component() {
        let component = RepoKey::parse("../../etc/passwd").unwrap().storage_component();
        assert!(!component.contains('/'));
        assert!(!component.starts_with('.'));
    }

    #[test]
    fn test_storage_component_distinguishes_escaped_collisions() {
        let slash = RepoKey::parse("a/b").unwrap().storage_component();
        let underscore = RepoKey::parse("a_b").unwrap().storage_component();

        assert!(slash.starts_with("a_b-"));
        assert!(underscore.starts_with("a_b-"));
        assert_ne!(slash, underscore);
    }

    #[test]
    fn test_longest_key_fits_a_filename() {
        let ascii = RepoKey::parse(format!("acme/{}", "w".repeat(MAX_KEY_LEN - 5))).unwrap();
        assert_eq!(ascii.as_str().len(), MAX_KEY_LEN);
        assert!(ascii.storage_component().len() <= 255);

        // Each multi-byte char escapes to one byte.
        let wide = RepoKey::parse("ü".repeat(MAX_KEY_LEN / 2)).unwrap();
        let component = wide.storage_component();
        assert!(component.len() <= 255);
        assert!(component.is_ascii());
    }

    #[test]
    fn test_long_keys_sharing_a_prefix_stay_distinct() {
        let base = "w".repeat(200);
        let a = RepoKey::parse(format!("acme/{base}a")).unwrap().storage_component();
        let b = RepoKey::parse(format!("acme/{base}b")).unwrap().storage_component();
        assert_ne!(a, b);
    }

    #[test]
    fn test_storage_component_is_stable() {
        let key = RepoKey::parse("acme/widgets").unwrap();
        assert_eq!(key.storage_component(), key.clone().storage_component());
    }

    #[test]
    fn test_serde_validates() {
        let key: RepoKey = serde_json::from_str(r#""acme/widgets""#).unwrap();
        assert_eq!(key.as_str(), "acme/widgets");
        assert!(serde_json::from_str::<RepoKey>(r#""""#).is_err());
    }
}
