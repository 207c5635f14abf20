//! Request-facing facade over the registry, cache and worker pool.
//!
//! Every operation here is non-blocking and never returns a raw error:
//! malformed keys, unknown keys and failed jobs all map to a response value.

use crate::cache::StageCache;
use crate::config::ServiceConfig;
use crate::core::{Credential, QueryState, RepoKey, ResultPayload, SubmitStatus};
use crate::errors::{ErrorReport, RepoHealthError};
use crate::events::{EventSink, LoggingEventSink};
use crate::jobs::{JobRegistry, JobState, JobSummary};
use crate::pipeline::PipelineRunner;
use crate::ports::Collaborators;
use crate::status_log::{StatusEntry, StatusLog};
use crate::utils::{now_utc, pretty_timedelta, Timestamp};
use crate::worker::{ShutdownMode, WorkerPool};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// What the submission did.
    pub status: SubmitStatus,
    /// Human-readable explanation.
    pub message: String,
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// The key's state.
    pub state: QueryState,
    /// Stage transitions recorded so far.
    pub stages: Vec<StatusEntry>,
    /// When the job was created, if one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// Human-readable summary.
    pub message: String,
    /// The stored failure, for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Answer to a result query.
#[derive(Debug, Clone)]
pub enum ResultResponse {
    /// The job succeeded.
    Ready(Arc<ResultPayload>),
    /// No job exists yet, or it is still running.
    NotReady {
        /// The queried key.
        key: String,
    },
    /// The job failed; the stored error is replayed verbatim.
    Failed(ErrorReport),
}

impl ResultResponse {
    /// Returns true for [`ResultResponse::Ready`].
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Converts into a plain `Result`.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` or the replayed failure.
    pub fn into_result(self) -> Result<Arc<ResultPayload>, RepoHealthError> {
        match self {
            Self::Ready(payload) => Ok(payload),
            Self::NotReady { key } => Err(RepoHealthError::NotReady { key }),
            Self::Failed(report) => Err(report.to_error()),
        }
    }
}

/// Wires storage, pipeline, workers and registry together.
pub struct RepoHealthService {
    config: ServiceConfig,
    cache: StageCache,
    registry: JobRegistry,
}

impl fmt::Debug for RepoHealthService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoHealthService")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RepoHealthService {
    /// Creates a service whose pipeline events go to the tracing log.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or if the worker pool
    /// cannot start.
    pub fn new(config: ServiceConfig, collaborators: Collaborators) -> Result<Self, RepoHealthError> {
        Self::with_event_sink(config, collaborators, Arc::new(LoggingEventSink::default()))
    }

    /// Creates a service emitting pipeline events to `events`.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or if the worker pool
    /// cannot start.
    pub fn with_event_sink(
        config: ServiceConfig,
        collaborators: Collaborators,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, RepoHealthError> {
        config.validate()?;

        let cache = StageCache::at(&config.storage_root);
        let runner = PipelineRunner::new(cache.clone(), collaborators).with_event_sink(events);
        let pool = WorkerPool::new(config.workers)?;
        let registry = JobRegistry::new(Arc::new(pool), Arc::new(runner));

        info!(
            storage_root = %config.storage_root.display(),
            workers = config.workers,
            "Service ready"
        );
        Ok(Self {
            config,
            cache,
            registry,
        })
    }

    /// Creates a service talking to GitHub and the `git` command line.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or if the HTTP client or
    /// worker pool cannot be built.
    #[cfg(feature = "github")]
    pub fn from_config(
        config: ServiceConfig,
        analyzer: Arc<dyn crate::ports::Analyzer>,
    ) -> Result<Self, RepoHealthError> {
        let fetcher = crate::github::GithubFetcher::new(&config.github)?;
        let collaborators = Collaborators::new(
            Arc::new(fetcher),
            Arc::new(crate::git_mirror::GitCliMirror::new()),
            analyzer,
        );
        Self::new(config, collaborators)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Returns the stage cache.
    #[must_use]
    pub fn cache(&self) -> &StageCache {
        &self.cache
    }

    /// Returns the job registry.
    #[must_use]
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Submits a key for analysis.
    pub fn submit(&self, key: &str, credential: Credential) -> SubmitResponse {
        let key = match RepoKey::parse(key) {
            Ok(key) => key,
            Err(err) => {
                warn!(error = %err, "Rejected submission");
                return SubmitResponse {
                    status: SubmitStatus::Rejected,
                    message: err.to_string(),
                };
            }
        };

        let (status, job) = self.registry.submit(key, credential);
        let message = match status {
            SubmitStatus::Submitted => format!("Analysis of {} has been queued.", job.key()),
            SubmitStatus::AlreadyRunning => format!("Analysis of {} is already running.", job.key()),
            SubmitStatus::AlreadyDone => format!("Analysis of {} has already finished.", job.key()),
            SubmitStatus::Rejected => String::new(),
        };
        SubmitResponse { status, message }
    }

    /// Reports progress for a key.
    ///
    /// Unknown or malformed keys are `Pending` with no stages.
    pub fn status(&self, key: &str) -> StatusResponse {
        let Some(job) = RepoKey::parse(key).ok().and_then(|key| self.registry.lookup(&key)) else {
            return StatusResponse {
                state: QueryState::Pending,
                stages: Vec::new(),
                started_at: None,
                message: format!("No analysis has been requested for {key}."),
                error: None,
            };
        };

        let stages = StatusLog::read(self.cache.layout(), job.key());
        let started_at = job.started_at();
        let (state, message, error) = match job.state() {
            JobState::Running => (
                QueryState::Running,
                format!(
                    "Job started {} and is still running.",
                    pretty_timedelta(&started_at, &now_utc())
                ),
                None,
            ),
            JobState::Succeeded => (QueryState::Done, "Job finished.".to_string(), None),
            JobState::Failed => {
                let report = job.error();
                let message = report
                    .as_ref()
                    .map_or_else(|| "Job failed.".to_string(), |r| format!("Job failed: {r}"));
                (QueryState::Failed, message, report)
            }
        };

        StatusResponse {
            state,
            stages,
            started_at: Some(started_at),
            message,
            error,
        }
    }

    /// Returns the result for a key without blocking.
    pub fn result(&self, key: &str) -> ResultResponse {
        let parsed = match RepoKey::parse(key) {
            Ok(parsed) => parsed,
            Err(err) => return ResultResponse::Failed(ErrorReport::from_error(&err)),
        };
        let Some(job) = self.registry.lookup(&parsed) else {
            return ResultResponse::NotReady { key: key.to_string() };
        };

        if let Some(payload) = job.payload() {
            ResultResponse::Ready(payload)
        } else if let Some(report) = job.error() {
            ResultResponse::Failed(report)
        } else {
            ResultResponse::NotReady { key: key.to_string() }
        }
    }

    /// Lists every known job, oldest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobSummary> {
        self.registry.jobs()
    }

    /// Removes every cached artifact for a key.
    ///
    /// Only meant for maintenance; the registry still remembers the job.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is malformed, its job is still running,
    /// or the files cannot be removed.
    pub fn purge(&self, key: &str) -> Result<(), RepoHealthError> {
        let key = RepoKey::parse(key)?;
        if self.registry.lookup(&key).is_some_and(|job| !job.is_done()) {
            return Err(RepoHealthError::pipeline(format!(
                "cannot purge {key} while its job is running"
            )));
        }
        self.cache.purge(&key)
    }

    /// Stops the worker pool.
    pub fn shutdown(&self, mode: ShutdownMode) {
        self.registry.shutdown(mode);
    }
}
