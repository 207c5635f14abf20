//! The assembled job result.

use super::RepoKey;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Section holding the resolved identity.
pub const SECTION_IDENTITY: &str = "identity";
/// Section holding raw repository metadata.
pub const SECTION_METADATA: &str = "metadata";
/// Section holding the projected issue list.
pub const SECTION_ISSUES: &str = "issues";
/// Section holding the stargazer list.
pub const SECTION_STARGAZERS: &str = "stargazers";
/// Section holding the derived commit statistics.
pub const SECTION_ANALYSIS: &str = "analysis";

/// The structured document handed to rendering collaborators.
///
/// The payload is a map of named sections; this crate never inspects the
/// section contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    /// The key the payload describes.
    pub key: RepoKey,
    /// When the pipeline assembled the payload.
    pub generated_at: Timestamp,
    /// Named sections, ordered by name.
    pub sections: BTreeMap<String, serde_json::Value>,
}

impl ResultPayload {
    /// Creates an empty payload.
    #[must_use]
    pub fn new(key: RepoKey) -> Self {
        Self {
            key,
            generated_at: crate::utils::now_utc(),
            sections: BTreeMap::new(),
        }
    }

    /// Adds a section.
    #[must_use]
    pub fn with_section(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts or replaces a section.
    pub fn insert(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.sections.insert(name.into(), value);
    }

    /// Gets a section.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&serde_json::Value> {
        self.sections.get(name)
    }

    /// Returns true if the section is present.
    #[must_use]
    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Returns the section names.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Converts to a single JSON document.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "key": self.key.as_str(),
            "generated_at": self.generated_at,
            "sections": self.sections,
        })
    }
}
