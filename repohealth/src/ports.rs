//! Collaborator ports consumed by the pipeline.
//!
//! The pipeline talks to the outside world only through these traits: a
//! remote fetcher for repository data, a mirror source for the local clone,
//! and an analyzer that derives statistics from the clone.

use crate::core::{Credential, RepoKey};
use crate::errors::RepoHealthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// The canonical identity of a repository, resolved from a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIdentity {
    /// Canonical `owner/name` as reported upstream.
    pub full_name: String,
    /// URL the local mirror is cloned from.
    pub clone_url: String,
    /// Human-facing URL, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    /// Default branch, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
}

impl RepoIdentity {
    /// Creates an identity with only the required fields.
    #[must_use]
    pub fn new(full_name: impl Into<String>, clone_url: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            clone_url: clone_url.into(),
            html_url: None,
            default_branch: None,
        }
    }

    /// Sets the human-facing URL.
    #[must_use]
    pub fn with_html_url(mut self, url: impl Into<String>) -> Self {
        self.html_url = Some(url.into());
        self
    }

    /// Sets the default branch.
    #[must_use]
    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = Some(branch.into());
        self
    }
}

/// Fetches repository data from a remote API.
///
/// Every call carries the credential of the caller that created the job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Resolves a key to a repository identity.
    async fn resolve(
        &self,
        key: &RepoKey,
        credential: &Credential,
    ) -> Result<RepoIdentity, RepoHealthError>;

    /// Fetches raw repository metadata.
    async fn metadata(
        &self,
        identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<serde_json::Value, RepoHealthError>;

    /// Fetches the issue list.
    async fn issues(
        &self,
        identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<serde_json::Value, RepoHealthError>;

    /// Fetches the stargazer list.
    async fn stargazers(
        &self,
        identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<serde_json::Value, RepoHealthError>;
}

/// Creates and refreshes the local mirror.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MirrorSource: Send + Sync {
    /// Clones the repository into `dest`, which does not exist yet.
    async fn clone_mirror(
        &self,
        identity: &RepoIdentity,
        credential: &Credential,
        dest: &Path,
    ) -> Result<(), RepoHealthError>;

    /// Brings an existing mirror up to date.
    async fn update(&self, mirror: &Path, credential: &Credential) -> Result<(), RepoHealthError>;
}

/// Derives statistics from a local mirror.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Computes the analysis section.
    async fn analyze(&self, mirror: &Path) -> Result<serde_json::Value, RepoHealthError>;
}

/// The set of collaborators a pipeline runs against.
#[derive(Clone)]
pub struct Collaborators {
    /// Remote API fetcher.
    pub fetcher: Arc<dyn RemoteFetcher>,
    /// Local mirror source.
    pub mirror: Arc<dyn MirrorSource>,
    /// Commit analyzer.
    pub analyzer: Arc<dyn Analyzer>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Bundles the three collaborators.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn RemoteFetcher>,
        mirror: Arc<dyn MirrorSource>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            fetcher,
            mirror,
            analyzer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_serialization_skips_missing_fields() {
        let identity = RepoIdentity::new("acme/widgets", "https://example.com/acme/widgets.git");
        let json = serde_json::to_value(&identity).unwrap();

        assert_eq!(json["full_name"], "acme/widgets");
        assert!(json.get("html_url").is_none());

        let with_branch = identity.with_default_branch("main");
        let back: RepoIdentity =
            serde_json::from_value(serde_json::to_value(&with_branch).unwrap()).unwrap();
        assert_eq!(back, with_branch);
    }

    #[tokio::test]
    async fn test_mocked_fetcher_behind_trait_object() {
        let mut fetcher = MockRemoteFetcher::new();
        fetcher
            .expect_resolve()
            .returning(|key, _| Err(RepoHealthError::not_found(key.as_str())));

        let fetcher: Arc<dyn RemoteFetcher> = Arc::new(fetcher);
        let key = RepoKey::parse("acme/missing").unwrap();
        let err = fetcher.resolve(&key, &Credential::new("t")).await.unwrap_err();

        assert_eq!(err.to_string(), "Repository \"acme/missing\" not found");
    }
}
