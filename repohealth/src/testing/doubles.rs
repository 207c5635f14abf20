//! Recording collaborator doubles.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Credential, RepoKey};
use crate::errors::RepoHealthError;
use crate::ports::{Analyzer, Collaborators, MirrorSource, RemoteFetcher, RepoIdentity};

type ErrorFactory = Arc<dyn Fn() -> RepoHealthError + Send + Sync>;

/// A [`RemoteFetcher`] call, as recorded by [`StaticFetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchCall {
    /// `resolve`
    Resolve,
    /// `metadata`
    Metadata,
    /// `issues`
    Issues,
    /// `stargazers`
    Stargazers,
}

/// A fetcher returning canned data and recording every call.
pub struct StaticFetcher {
    metadata: serde_json::Value,
    issues: serde_json::Value,
    stargazers: serde_json::Value,
    delay: Duration,
    failures: Mutex<HashMap<FetchCall, ErrorFactory>>,
    calls: Mutex<Vec<(FetchCall, String)>>,
}

impl std::fmt::Debug for StaticFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticFetcher")
            .field("delay", &self.delay)
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticFetcher {
    /// Creates a fetcher with small canned payloads.
    #[must_use]
    pub fn new() -> Self {
        Self {
            metadata: serde_json::json!({"stargazers_count": 2, "open_issues_count": 1}),
            issues: serde_json::json!([
                {"number": 1, "state": "open", "comments": 0, "user/login": "octo", "user/id": 1}
            ]),
            stargazers: serde_json::json!([
                {"starred_at": "2023-10-01T00:00:00Z", "user/login": "octo", "user/id": 1}
            ]),
            delay: Duration::ZERO,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the metadata returned.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the issues returned.
    #[must_use]
    pub fn with_issues(mut self, issues: serde_json::Value) -> Self {
        self.issues = issues;
        self
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes `call` fail with the error built by `make_error`.
    #[must_use]
    pub fn failing(self, call: FetchCall, make_error: impl Fn() -> RepoHealthError + Send + Sync + 'static) -> Self {
        self.failures.lock().insert(call, Arc::new(make_error));
        self
    }

    /// Returns every recorded call with the credential it carried.
    #[must_use]
    pub fn calls(&self) -> Vec<(FetchCall, String)> {
        self.calls.lock().clone()
    }

    /// Returns how often `call` was made.
    #[must_use]
    pub fn call_count(&self, call: FetchCall) -> usize {
        self.calls.lock().iter().filter(|(c, _)| *c == call).count()
    }

    /// Returns the distinct credentials seen, in first-seen order.
    #[must_use]
    pub fn credentials_seen(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (_, credential) in self.calls.lock().iter() {
            if !seen.contains(credential) {
                seen.push(credential.clone());
            }
        }
        seen
    }

    async fn record(&self, call: FetchCall, credential: &Credential) -> Result<(), RepoHealthError> {
        self.calls.lock().push((call, credential.expose().to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self.failures.lock().get(&call).cloned();
        match failure {
            Some(make_error) => Err(make_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteFetcher for StaticFetcher {
    async fn resolve(
        &self,
        key: &RepoKey,
        credential: &Credential,
    ) -> Result<RepoIdentity, RepoHealthError> {
        self.record(FetchCall::Resolve, credential).await?;
        Ok(RepoIdentity::new(
            key.as_str(),
            format!("https://example.invalid/{key}.git"),
        )
        .with_default_branch("main"))
    }

    async fn metadata(
        &self,
        _identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<serde_json::Value, RepoHealthError> {
        self.record(FetchCall::Metadata, credential).await?;
        Ok(self.metadata.clone())
    }

    async fn issues(
        &self,
        _identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<serde_json::Value, RepoHealthError> {
        self.record(FetchCall::Issues, credential).await?;
        Ok(self.issues.clone())
    }

    async fn stargazers(
        &self,
        _identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<serde_json::Value, RepoHealthError> {
        self.record(FetchCall::Stargazers, credential).await?;
        Ok(self.stargazers.clone())
    }
}

/// A mirror source that writes marker files instead of running git.
#[derive(Default)]
pub struct FakeMirror {
    clones: Mutex<Vec<PathBuf>>,
    updates: Mutex<Vec<PathBuf>>,
    clone_failure: Mutex<Option<ErrorFactory>>,
}

impl std::fmt::Debug for FakeMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeMirror")
            .field("clones", &self.clones.lock().len())
            .field("updates", &self.updates.lock().len())
            .finish()
    }
}

impl FakeMirror {
    /// Creates a mirror source that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `clone_mirror` fail, after writing a partial checkout.
    #[must_use]
    pub fn failing_clone(self, make_error: impl Fn() -> RepoHealthError + Send + Sync + 'static) -> Self {
        *self.clone_failure.lock() = Some(Arc::new(make_error));
        self
    }

    /// Returns the number of fresh clones.
    #[must_use]
    pub fn clone_count(&self) -> usize {
        self.clones.lock().len()
    }

    /// Returns the number of in-place updates.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.updates.lock().len()
    }
}

#[async_trait]
impl MirrorSource for FakeMirror {
    async fn clone_mirror(
        &self,
        identity: &RepoIdentity,
        _credential: &Credential,
        dest: &Path,
    ) -> Result<(), RepoHealthError> {
        self.clones.lock().push(dest.to_path_buf());
        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(dest.join("HEAD"), &identity.clone_url).await?;

        let failure = self.clone_failure.lock().clone();
        match failure {
            Some(make_error) => Err(make_error()),
            None => Ok(()),
        }
    }

    async fn update(&self, mirror: &Path, _credential: &Credential) -> Result<(), RepoHealthError> {
        self.updates.lock().push(mirror.to_path_buf());
        tokio::fs::write(mirror.join("FETCH_HEAD"), b"updated").await?;
        Ok(())
    }
}

/// An analyzer returning a fixed document.
///
/// Fails if the mirror directory it is handed does not exist.
#[derive(Debug)]
pub struct StaticAnalyzer {
    analysis: serde_json::Value,
    calls: Mutex<Vec<PathBuf>>,
}

impl Default for StaticAnalyzer {
    fn default() -> Self {
        Self::new(serde_json::json!({"commits": 42, "authors": 3}))
    }
}

impl StaticAnalyzer {
    /// Creates an analyzer returning `analysis`.
    #[must_use]
    pub fn new(analysis: serde_json::Value) -> Self {
        Self {
            analysis,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of analyses run.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Analyzer for StaticAnalyzer {
    async fn analyze(&self, mirror: &Path) -> Result<serde_json::Value, RepoHealthError> {
        self.calls.lock().push(mirror.to_path_buf());
        if !mirror.is_dir() {
            return Err(RepoHealthError::pipeline(format!(
                "mirror {} does not exist",
                mirror.display()
            )));
        }
        Ok(self.analysis.clone())
    }
}

/// The three doubles, kept alongside the [`Collaborators`] bundle built
/// from them so tests can inspect what was called.
#[derive(Debug, Clone)]
pub struct TestCollaborators {
    /// The fetcher double.
    pub fetcher: Arc<StaticFetcher>,
    /// The mirror double.
    pub mirror: Arc<FakeMirror>,
    /// The analyzer double.
    pub analyzer: Arc<StaticAnalyzer>,
}

impl Default for TestCollaborators {
    fn default() -> Self {
        Self::new(StaticFetcher::new())
    }
}

impl TestCollaborators {
    /// Wraps `fetcher` with a default mirror and analyzer.
    #[must_use]
    pub fn new(fetcher: StaticFetcher) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            mirror: Arc::new(FakeMirror::new()),
            analyzer: Arc::new(StaticAnalyzer::default()),
        }
    }

    /// Replaces the mirror double.
    #[must_use]
    pub fn with_mirror(mut self, mirror: FakeMirror) -> Self {
        self.mirror = Arc::new(mirror);
        self
    }

    /// Builds the trait-object bundle.
    #[must_use]
    pub fn bundle(&self) -> Collaborators {
        Collaborators::new(
            self.fetcher.clone(),
            self.mirror.clone(),
            self.analyzer.clone(),
        )
    }
}
