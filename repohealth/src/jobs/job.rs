//! A single deduplicated pipeline execution.

use crate::core::{RepoKey, ResultPayload};
use crate::errors::ErrorReport;
use crate::utils::{now_utc, Timestamp};
use crate::worker::{JobHandle, Outcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Where a job is in its lifecycle.
///
/// Moves from `Running` to one of the terminal states exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// The pipeline has not finished.
    Running,
    /// The pipeline produced a result.
    Succeeded,
    /// The pipeline stopped with an error.
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl JobState {
    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// The registry's record of the pipeline execution for one key.
///
/// Jobs are shared read-only between the registry and its callers; only the
/// worker running the pipeline moves the outcome to a terminal state.
pub struct Job {
    key: RepoKey,
    run_id: Uuid,
    started_at: Timestamp,
    handle: JobHandle<ResultPayload>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("key", &self.key)
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .field("state", &self.state())
            .finish()
    }
}

impl Job {
    pub(crate) fn new(key: RepoKey, handle: JobHandle<ResultPayload>) -> Self {
        Self {
            key,
            run_id: Uuid::new_v4(),
            started_at: now_utc(),
            handle,
        }
    }

    /// Returns the key the job runs for.
    #[must_use]
    pub fn key(&self) -> &RepoKey {
        &self.key
    }

    /// Returns the id correlating this run's log lines and events.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns when the job was created.
    #[must_use]
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Returns the completion handle.
    #[must_use]
    pub fn handle(&self) -> &JobHandle<ResultPayload> {
        &self.handle
    }

    /// Returns a snapshot of the outcome. Never blocks.
    #[must_use]
    pub fn outcome(&self) -> Outcome<ResultPayload> {
        self.handle.outcome()
    }

    /// Returns the current state. Never blocks.
    #[must_use]
    pub fn state(&self) -> JobState {
        match self.handle.outcome() {
            Outcome::Pending => JobState::Running,
            Outcome::Value(_) => JobState::Succeeded,
            Outcome::Error(_) => JobState::Failed,
        }
    }

    /// Returns true once the pipeline has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    /// Returns the result, if the job succeeded.
    #[must_use]
    pub fn payload(&self) -> Option<Arc<ResultPayload>> {
        self.handle.outcome().value().cloned()
    }

    /// Returns the stored failure, if the job failed.
    #[must_use]
    pub fn error(&self) -> Option<ErrorReport> {
        self.handle.error()
    }

    /// Waits for the pipeline to finish.
    pub async fn wait(&self) -> Outcome<ResultPayload> {
        self.handle.wait().await
    }

    /// Returns the serializable summary of this job.
    #[must_use]
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            key: self.key.clone(),
            run_id: self.run_id,
            state: self.state(),
            started_at: self.started_at,
        }
    }
}

/// A point-in-time view of a job, as listed on an operator page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    /// The job's key.
    pub key: RepoKey,
    /// The job's run id.
    pub run_id: Uuid,
    /// The state when the summary was taken.
    pub state: JobState,
    /// When the job was created.
    pub started_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::worker::completion;

    fn job() -> (crate::worker::Completer<ResultPayload>, Job) {
        let key = RepoKey::parse("acme/widgets").unwrap();
        let (completer, handle) = completion(key.as_str());
        (completer, Job::new(key, handle))
    }

    #[test]
    fn test_running_until_completed() {
        let (completer, job) = job();
        assert_eq!(job.state(), JobState::Running);
        assert!(!job.is_done());
        assert!(job.payload().is_none());

        completer.succeed(ResultPayload::new(job.key().clone()));

        assert_eq!(job.state(), JobState::Succeeded);
        assert!(job.state().is_terminal());
        assert_eq!(job.payload().unwrap().key.as_str(), "acme/widgets");
    }

    #[test]
    fn test_failed_job_exposes_error() {
        let (completer, job) = job();
        completer.fail(ErrorReport::new(ErrorKind::AuthFailure, "Bad credentials"));

        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error().unwrap().kind, ErrorKind::AuthFailure);
        assert!(job.payload().is_none());
    }

    #[test]
    fn test_wait_returns_immediately_once_done() {
        let (completer, job) = job();
        completer.succeed(ResultPayload::new(job.key().clone()));

        let outcome = tokio_test::block_on(job.wait());
        assert!(outcome.value().is_some());
    }

    #[test]
    fn test_summary_serializes_state() {
        let (_completer, job) = job();
        let value = serde_json::to_value(job.summary()).unwrap();

        assert_eq!(value["key"], "acme/widgets");
        assert_eq!(value["state"], "running");
        assert_eq!(value["run_id"], job.run_id().to_string());
    }
}
