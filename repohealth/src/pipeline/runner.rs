//! Executes the stage sequence for one key.

use super::stage::{Stage, SKIP_MIRROR_STAGE};
use crate::cache::{CacheTier, StageCache};
use crate::core::{Credential, RepoKey, ResultPayload};
use crate::errors::{ErrorReport, RepoHealthError};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::observability::SpanTimer;
use crate::ports::{Collaborators, RepoIdentity};
use crate::status_log::StatusLog;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runs the fetch, clone and analyze stages for a key.
///
/// Each stage checks its cache tier first. A hit loads the artifact and is
/// logged under the stage's `load-cached-*` name; a miss runs the producer
/// and persists its output. The first failure aborts the run.
pub struct PipelineRunner {
    cache: StageCache,
    collaborators: Collaborators,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

struct RunContext<'a> {
    key: &'a RepoKey,
    credential: &'a Credential,
    log: StatusLog,
    current: Option<SpanTimer>,
    identity: Option<RepoIdentity>,
    mirror: Option<PathBuf>,
    payload: ResultPayload,
}

impl RunContext<'_> {
    fn identity(&self) -> Result<RepoIdentity, RepoHealthError> {
        self.identity
            .clone()
            .ok_or_else(|| RepoHealthError::pipeline("repository identity has not been resolved"))
    }

    fn insert<T: Serialize>(&mut self, tier: CacheTier, value: &T) -> Result<(), RepoHealthError> {
        self.payload.insert(tier.section(), serde_json::to_value(value)?);
        Ok(())
    }
}

impl PipelineRunner {
    /// Creates a runner that emits no events.
    #[must_use]
    pub fn new(cache: StageCache, collaborators: Collaborators) -> Self {
        Self {
            cache,
            collaborators,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the stage cache.
    #[must_use]
    pub fn cache(&self) -> &StageCache {
        &self.cache
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Runs every stage for `key`.
    ///
    /// The status log is reset at the start and always left with no open
    /// entry at the end, whether the run succeeds or fails.
    ///
    /// # Errors
    ///
    /// Returns the failing stage's error as a report carrying the stage name.
    pub async fn run(
        &self,
        key: &RepoKey,
        credential: &Credential,
    ) -> Result<ResultPayload, ErrorReport> {
        let timer = SpanTimer::start(key.as_str());
        let mut ctx = RunContext {
            key,
            credential,
            log: StatusLog::open(self.cache.layout(), key),
            current: None,
            identity: None,
            mirror: None,
            payload: ResultPayload::new(key.clone()),
        };

        if let Err(err) = ctx.log.reset() {
            return Err(self.fail(&mut ctx, None, err.into()).await);
        }

        for stage in Stage::ALL {
            if let Err(err) = self.run_stage(stage, &mut ctx).await {
                return Err(self.fail(&mut ctx, Some(stage), err).await);
            }
        }

        self.complete_current(&mut ctx).await;
        if let Err(err) = ctx.log.finish() {
            return Err(self.fail(&mut ctx, None, err.into()).await);
        }

        let duration_ms = timer.finish();
        info!(key = %key, duration_ms, "Pipeline completed");
        self.events
            .emit(PipelineEvent::JobSucceeded {
                key: key.clone(),
                duration_ms,
            })
            .await;

        ctx.payload.generated_at = crate::utils::now_utc();
        Ok(ctx.payload)
    }

    async fn run_stage(&self, stage: Stage, ctx: &mut RunContext<'_>) -> Result<(), RepoHealthError> {
        let key = ctx.key;
        let credential = ctx.credential;
        let fetcher = &self.collaborators.fetcher;

        match stage {
            Stage::ResolveIdentity => {
                let identity: RepoIdentity = self
                    .load_or_produce(ctx, stage, CacheTier::Identity, || {
                        fetcher.resolve(key, credential)
                    })
                    .await?;
                ctx.insert(CacheTier::Identity, &identity)?;
                ctx.identity = Some(identity);
            }
            Stage::FetchRemoteMetadata => {
                let identity = ctx.identity()?;
                let metadata: serde_json::Value = self
                    .load_or_produce(ctx, stage, CacheTier::Metadata, || async move {
                        fetcher.metadata(&identity, credential).await
                    })
                    .await?;
                ctx.insert(CacheTier::Metadata, &metadata)?;
            }
            Stage::FetchRemoteIssues => {
                let identity = ctx.identity()?;
                let issues: serde_json::Value = self
                    .load_or_produce(ctx, stage, CacheTier::Issues, || async move {
                        fetcher.issues(&identity, credential).await
                    })
                    .await?;
                ctx.insert(CacheTier::Issues, &issues)?;
            }
            Stage::FetchRemoteSocialSignal => {
                let identity = ctx.identity()?;
                let stargazers: serde_json::Value = self
                    .load_or_produce(ctx, stage, CacheTier::Stargazers, || async move {
                        fetcher.stargazers(&identity, credential).await
                    })
                    .await?;
                ctx.insert(CacheTier::Stargazers, &stargazers)?;
            }
            Stage::ObtainOrUpdateLocalMirror => {
                if self.cache.has_artifact(key, CacheTier::Analysis) {
                    self.begin(ctx, SKIP_MIRROR_STAGE, "Commit statistics cached", false)
                        .await?;
                } else {
                    let identity = ctx.identity()?;
                    let message = if self.cache.has_mirror(key) {
                        stage.cached_message()
                    } else {
                        stage.message()
                    };
                    self.begin(ctx, stage.name(), message, false).await?;
                    ctx.mirror = Some(self.obtain_mirror(key, &identity, credential).await?);
                }
            }
            Stage::ComputeDerivedAnalysis => {
                let identity = ctx.identity()?;
                let mirror = ctx.mirror.clone();
                let analysis: serde_json::Value = self
                    .load_or_produce(ctx, stage, CacheTier::Analysis, move || async move {
                        // A corrupt analysis artifact means the mirror stage was skipped.
                        let mirror = match mirror {
                            Some(mirror) => mirror,
                            None => self.obtain_mirror(key, &identity, credential).await?,
                        };
                        self.collaborators.analyzer.analyze(&mirror).await
                    })
                    .await?;
                ctx.insert(CacheTier::Analysis, &analysis)?;
            }
        }
        Ok(())
    }

    async fn load_or_produce<T, F, Fut>(
        &self,
        ctx: &mut RunContext<'_>,
        stage: Stage,
        tier: CacheTier,
        producer: F,
    ) -> Result<T, RepoHealthError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RepoHealthError>>,
    {
        let key = ctx.key;
        if self.cache.has_artifact(key, tier) {
            let name = stage.cached_name().unwrap_or_else(|| stage.name());
            self.begin(ctx, name, stage.cached_message(), true).await?;

            match self.cache.load(key, tier) {
                Ok(value) => return Ok(value),
                Err(RepoHealthError::CorruptArtifact { path, source, .. }) => {
                    warn!(
                        key = %key,
                        tier = %tier,
                        path = %path.display(),
                        error = %source,
                        "Discarding corrupt artifact"
                    );
                    self.events
                        .emit(PipelineEvent::CorruptArtifact {
                            key: key.clone(),
                            tier: tier.to_string(),
                            error: source.to_string(),
                        })
                        .await;
                    self.cache.discard(key, tier)?;
                }
                Err(err) => return Err(err),
            }
        }

        self.begin(ctx, stage.name(), stage.message(), false).await?;
        self.cache.produce_and_store(key, tier, producer).await
    }

    async fn obtain_mirror(
        &self,
        key: &RepoKey,
        identity: &RepoIdentity,
        credential: &Credential,
    ) -> Result<PathBuf, RepoHealthError> {
        let source = &self.collaborators.mirror;

        if self.cache.has_mirror(key) {
            let mirror = self.cache.mirror_dir(key);
            debug!(key = %key, "Updating existing mirror");
            source.update(&mirror, credential).await?;
            return Ok(mirror);
        }

        let staging = self.cache.prepare_mirror_staging(key)?;
        debug!(key = %key, clone_url = %identity.clone_url, "Cloning fresh mirror");
        match source.clone_mirror(identity, credential, &staging).await {
            Ok(()) => self.cache.publish_mirror(key, &staging),
            Err(err) => {
                self.cache.discard_mirror_staging(&staging);
                Err(err)
            }
        }
    }

    async fn begin(
        &self,
        ctx: &mut RunContext<'_>,
        name: &'static str,
        message: &str,
        cached: bool,
    ) -> Result<(), RepoHealthError> {
        self.complete_current(ctx).await;
        ctx.log.begin_stage(name, message)?;
        ctx.current = Some(SpanTimer::start(name));

        debug!(key = %ctx.key, stage = name, cached, "Stage started");
        self.events
            .emit(PipelineEvent::StageStarted {
                key: ctx.key.clone(),
                stage: name.to_string(),
                cached,
            })
            .await;
        Ok(())
    }

    async fn complete_current(&self, ctx: &mut RunContext<'_>) {
        if let Some(timer) = ctx.current.take() {
            let stage = timer.name().to_string();
            let duration_ms = timer.finish();
            self.events
                .emit(PipelineEvent::StageCompleted {
                    key: ctx.key.clone(),
                    stage,
                    duration_ms,
                })
                .await;
        }
    }

    async fn fail(
        &self,
        ctx: &mut RunContext<'_>,
        stage: Option<Stage>,
        err: RepoHealthError,
    ) -> ErrorReport {
        ctx.current = None;
        if let Err(log_err) = ctx.log.finish() {
            warn!(key = %ctx.key, error = %log_err, "Failed to close status log");
        }

        let mut report = ErrorReport::from_error(&err);
        if let Some(stage) = stage {
            report = report.with_stage(stage.name());
        }

        error!(key = %ctx.key, error = %report, "Pipeline failed");
        self.events
            .emit(PipelineEvent::JobFailed {
                key: ctx.key.clone(),
                error: report.clone(),
            })
            .await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::events::CollectingEventSink;
    use crate::ports::{MockAnalyzer, MockMirrorSource, MockRemoteFetcher};
    use crate::testing::{FakeMirror, FetchCall, StaticFetcher, TestCollaborators};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Harness {
        _dir: tempfile::TempDir,
        cache: StageCache,
        doubles: TestCollaborators,
        events: Arc<CollectingEventSink>,
        key: RepoKey,
    }

    impl Harness {
        fn new(doubles: TestCollaborators) -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                cache: StageCache::at(dir.path()),
                _dir: dir,
                doubles,
                events: Arc::new(CollectingEventSink::new()),
                key: RepoKey::parse("acme/widgets").unwrap(),
            }
        }

        fn runner(&self) -> PipelineRunner {
            PipelineRunner::new(self.cache.clone(), self.doubles.bundle())
                .with_event_sink(self.events.clone())
        }

        async fn run(&self) -> Result<ResultPayload, ErrorReport> {
            self.runner().run(&self.key, &Credential::new("token")).await
        }

        fn logged_stages(&self) -> Vec<String> {
            StatusLog::read(self.cache.layout(), &self.key)
                .into_iter()
                .map(|e| e.stage)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_fresh_run_produces_every_section() {
        let harness = Harness::new(TestCollaborators::default());

        let payload = harness.run().await.unwrap();

        for section in ["identity", "metadata", "issues", "stargazers", "analysis"] {
            assert!(payload.has_section(section), "missing {section}");
        }
        assert_eq!(payload.section("analysis").unwrap()["commits"], 42);
        assert_eq!(
            harness.logged_stages(),
            Stage::ALL.iter().map(|s| s.name().to_string()).collect::<Vec<_>>()
        );
        assert!(StatusLog::read(harness.cache.layout(), &harness.key)
            .iter()
            .all(|e| !e.is_open()));
        for tier in CacheTier::ALL {
            assert!(harness.cache.has_artifact(&harness.key, tier));
        }
        assert!(harness.cache.has_mirror(&harness.key));
        assert_eq!(harness.doubles.mirror.clone_count(), 1);
        assert_eq!(harness.events.events_of_type("stage.started").len(), 6);
        assert_eq!(harness.events.events_of_type("stage.completed").len(), 6);
        assert_eq!(harness.events.events_of_type("job.succeeded").len(), 1);
    }

    #[tokio::test]
    async fn test_cached_tiers_are_loaded_not_produced() {
        let harness = Harness::new(TestCollaborators::default());
        let key = &harness.key;
        harness
            .cache
            .store(key, CacheTier::Identity, &RepoIdentity::new("acme/widgets", "x"))
            .unwrap();
        harness
            .cache
            .store(key, CacheTier::Metadata, &json!({"cached": true}))
            .unwrap();

        let payload = harness.run().await.unwrap();

        assert_eq!(payload.section("metadata").unwrap(), &json!({"cached": true}));
        assert_eq!(harness.doubles.fetcher.call_count(FetchCall::Resolve), 0);
        assert_eq!(harness.doubles.fetcher.call_count(FetchCall::Metadata), 0);
        assert_eq!(harness.doubles.fetcher.call_count(FetchCall::Issues), 1);
        assert_eq!(
            &harness.logged_stages()[..3],
            &["load-cached-identity", "load-cached-metadata", "fetch-remote-issues"]
        );
    }

    #[tokio::test]
    async fn test_fully_cached_run_touches_no_collaborator() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StageCache::at(dir.path());
        let key = RepoKey::parse("acme/widgets").unwrap();
        cache.store(&key, CacheTier::Identity, &RepoIdentity::new("acme/widgets", "x")).unwrap();
        for tier in &CacheTier::ALL[1..] {
            cache.store(&key, *tier, &json!({"tier": tier.as_str()})).unwrap();
        }

        // Mocks without expectations panic on any call.
        let collaborators = Collaborators::new(
            Arc::new(MockRemoteFetcher::new()),
            Arc::new(MockMirrorSource::new()),
            Arc::new(MockAnalyzer::new()),
        );
        let payload = PipelineRunner::new(cache.clone(), collaborators)
            .run(&key, &Credential::new("token"))
            .await
            .unwrap();

        assert_eq!(payload.section("analysis").unwrap()["tier"], "analysis");
        let stages: Vec<_> = StatusLog::read(cache.layout(), &key)
            .into_iter()
            .map(|e| e.stage)
            .collect();
        assert_eq!(
            stages,
            vec![
                "load-cached-identity",
                "load-cached-metadata",
                "load-cached-issues",
                "load-cached-stargazers",
                SKIP_MIRROR_STAGE,
                "load-cached-analysis",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_earlier_tiers_and_omits_failed_tier() {
        let fetcher = StaticFetcher::new()
            .failing(FetchCall::Issues, || RepoHealthError::rate_limited("API rate limit exceeded", Some(60)));
        let harness = Harness::new(TestCollaborators::new(fetcher));

        let report = harness.run().await.unwrap_err();

        assert_eq!(report.kind, ErrorKind::RateLimited);
        assert_eq!(report.stage.as_deref(), Some("fetch-remote-issues"));
        assert!(harness.cache.has_artifact(&harness.key, CacheTier::Identity));
        assert!(harness.cache.has_artifact(&harness.key, CacheTier::Metadata));
        assert!(!harness.cache.has_artifact(&harness.key, CacheTier::Issues));
        assert!(!harness.cache.has_artifact(&harness.key, CacheTier::Stargazers));
        assert_eq!(harness.doubles.fetcher.call_count(FetchCall::Stargazers), 0);

        let entries = StatusLog::read(harness.cache.layout(), &harness.key);
        assert_eq!(entries.last().unwrap().stage, "fetch-remote-issues");
        assert!(entries.iter().all(|e| !e.is_open()));
        assert_eq!(harness.events.events_of_type("job.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_reproduced() {
        let harness = Harness::new(TestCollaborators::default());
        harness.run().await.unwrap();

        let path = harness.cache.layout().artifact_path(&harness.key, CacheTier::Metadata);
        std::fs::write(&path, b"{\"stargazers_count\": ").unwrap();

        let payload = harness.run().await.unwrap();

        assert_eq!(harness.doubles.fetcher.call_count(FetchCall::Metadata), 2);
        assert_eq!(payload.section("metadata").unwrap()["stargazers_count"], 2);
        let stages = harness.logged_stages();
        assert_eq!(&stages[1..3], &["load-cached-metadata", "fetch-remote-metadata"]);
        assert_eq!(harness.events.events_of_type("cache.corrupt").len(), 1);

        let reloaded: serde_json::Value =
            harness.cache.load(&harness.key, CacheTier::Metadata).unwrap();
        assert_eq!(reloaded["stargazers_count"], 2);
    }

    #[tokio::test]
    async fn test_existing_mirror_is_updated_in_place() {
        let harness = Harness::new(TestCollaborators::default());
        harness.run().await.unwrap();
        harness.cache.discard(&harness.key, CacheTier::Analysis).unwrap();

        harness.run().await.unwrap();

        assert_eq!(harness.doubles.mirror.clone_count(), 1);
        assert_eq!(harness.doubles.mirror.update_count(), 1);
        assert_eq!(harness.doubles.analyzer.call_count(), 2);
        assert!(harness.logged_stages().contains(&"obtain-or-update-local-mirror".to_string()));
    }

    #[tokio::test]
    async fn test_failed_clone_publishes_nothing() {
        let doubles = TestCollaborators::default().with_mirror(
            FakeMirror::new().failing_clone(|| RepoHealthError::network("connection reset by peer")),
        );
        let harness = Harness::new(doubles);

        let report = harness.run().await.unwrap_err();

        assert_eq!(report.kind, ErrorKind::NetworkFailure);
        assert_eq!(report.stage.as_deref(), Some("obtain-or-update-local-mirror"));
        assert!(!harness.cache.has_mirror(&harness.key));
        assert!(!harness.cache.layout().mirror_staging_dir(&harness.key).exists());
        assert!(!harness.cache.has_artifact(&harness.key, CacheTier::Analysis));
    }

    #[tokio::test]
    async fn test_rerun_resets_status_log() {
        let harness = Harness::new(TestCollaborators::default());
        harness.run().await.unwrap();
        harness.run().await.unwrap();

        let stages = harness.logged_stages();
        assert_eq!(stages.len(), 6);
        assert_eq!(stages[0], "load-cached-identity");
    }
}
