//! Cache tier identifiers.

use crate::core::payload;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A persisted stage artifact.
///
/// All tiers are immutable once written. The local mirror is not a tier: it
/// is updated in place and handled by [`super::StageCache::publish_mirror`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// The resolved repository identity.
    Identity,
    /// Raw repository metadata.
    Metadata,
    /// Projected issue list.
    Issues,
    /// Stargazer list.
    Stargazers,
    /// Derived commit statistics.
    Analysis,
}

impl CacheTier {
    /// All tiers in pipeline order.
    pub const ALL: [CacheTier; 5] = [
        Self::Identity,
        Self::Metadata,
        Self::Issues,
        Self::Stargazers,
        Self::Analysis,
    ];

    /// Returns the tier name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Metadata => "metadata",
            Self::Issues => "issues",
            Self::Stargazers => "stargazers",
            Self::Analysis => "analysis",
        }
    }

    /// Returns the artifact file name.
    #[must_use]
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Identity => "identity.json",
            Self::Metadata => "metadata.json",
            Self::Issues => "issues.json",
            Self::Stargazers => "stargazers.json",
            Self::Analysis => "analysis.json",
        }
    }

    /// Returns the result payload section the artifact is merged into.
    #[must_use]
    pub fn section(self) -> &'static str {
        match self {
            Self::Identity => payload::SECTION_IDENTITY,
            Self::Metadata => payload::SECTION_METADATA,
            Self::Issues => payload::SECTION_ISSUES,
            Self::Stargazers => payload::SECTION_STARGAZERS,
            Self::Analysis => payload::SECTION_ANALYSIS,
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
