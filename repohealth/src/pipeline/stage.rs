//! The fixed stage sequence.

use crate::cache::CacheTier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logged instead of the mirror stage when the analysis is already cached.
pub const SKIP_MIRROR_STAGE: &str = "skip-local-mirror";

/// One step of the fetch-or-compute pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Resolve the key to a canonical repository identity.
    ResolveIdentity,
    /// Fetch raw repository metadata.
    FetchRemoteMetadata,
    /// Fetch the issue list.
    FetchRemoteIssues,
    /// Fetch the stargazer list.
    FetchRemoteSocialSignal,
    /// Clone or update the local mirror.
    ObtainOrUpdateLocalMirror,
    /// Derive commit statistics from the mirror.
    ComputeDerivedAnalysis,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Self::ResolveIdentity,
        Self::FetchRemoteMetadata,
        Self::FetchRemoteIssues,
        Self::FetchRemoteSocialSignal,
        Self::ObtainOrUpdateLocalMirror,
        Self::ComputeDerivedAnalysis,
    ];

    /// Returns the stage name logged when the stage does real work.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ResolveIdentity => "resolve-identity",
            Self::FetchRemoteMetadata => "fetch-remote-metadata",
            Self::FetchRemoteIssues => "fetch-remote-issues",
            Self::FetchRemoteSocialSignal => "fetch-remote-social-signal",
            Self::ObtainOrUpdateLocalMirror => "obtain-or-update-local-mirror",
            Self::ComputeDerivedAnalysis => "compute-derived-analysis",
        }
    }

    /// Returns the stage name logged when the artifact is loaded from cache.
    ///
    /// The mirror has no cached form; it is always obtained or updated.
    #[must_use]
    pub fn cached_name(self) -> Option<&'static str> {
        match self {
            Self::ResolveIdentity => Some("load-cached-identity"),
            Self::FetchRemoteMetadata => Some("load-cached-metadata"),
            Self::FetchRemoteIssues => Some("load-cached-issues"),
            Self::FetchRemoteSocialSignal => Some("load-cached-stargazers"),
            Self::ObtainOrUpdateLocalMirror => None,
            Self::ComputeDerivedAnalysis => Some("load-cached-analysis"),
        }
    }

    /// Returns the human-readable label for the working stage.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::ResolveIdentity => "Resolving repository",
            Self::FetchRemoteMetadata => "Fetching repository metadata",
            Self::FetchRemoteIssues => "Fetching issues",
            Self::FetchRemoteSocialSignal => "Fetching stargazers",
            Self::ObtainOrUpdateLocalMirror => "Cloning or updating repository",
            Self::ComputeDerivedAnalysis => "Computing commit statistics",
        }
    }

    /// Returns the human-readable label when existing state is reused.
    #[must_use]
    pub fn cached_message(self) -> &'static str {
        match self {
            Self::ResolveIdentity => "Loading cached repository identity",
            Self::FetchRemoteMetadata => "Loading cached repository metadata",
            Self::FetchRemoteIssues => "Loading cached issues",
            Self::FetchRemoteSocialSignal => "Loading cached stargazers",
            Self::ObtainOrUpdateLocalMirror => "Updating existing repository clone",
            Self::ComputeDerivedAnalysis => "Loading cached commit statistics",
        }
    }

    /// Returns the cache tier backing the stage, if any.
    #[must_use]
    pub fn tier(self) -> Option<CacheTier> {
        match self {
            Self::ResolveIdentity => Some(CacheTier::Identity),
            Self::FetchRemoteMetadata => Some(CacheTier::Metadata),
            Self::FetchRemoteIssues => Some(CacheTier::Issues),
            Self::FetchRemoteSocialSignal => Some(CacheTier::Stargazers),
            Self::ObtainOrUpdateLocalMirror => None,
            Self::ComputeDerivedAnalysis => Some(CacheTier::Analysis),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stage_names_are_distinct() {
        let mut names = HashSet::new();
        for stage in Stage::ALL {
            assert!(names.insert(stage.name()));
            if let Some(cached) = stage.cached_name() {
                assert!(cached.starts_with("load-cached-"));
                assert!(names.insert(cached));
            }
        }
        assert!(names.insert(SKIP_MIRROR_STAGE));
    }

    #[test]
    fn test_every_tier_has_a_stage() {
        let tiers: Vec<_> = Stage::ALL.iter().filter_map(|s| s.tier()).collect();
        assert_eq!(tiers, CacheTier::ALL.to_vec());
    }

    #[test]
    fn test_serde_uses_stage_name() {
        let json = serde_json::to_value(Stage::FetchRemoteSocialSignal).unwrap();
        assert_eq!(json, "fetch-remote-social-signal");
    }
}
