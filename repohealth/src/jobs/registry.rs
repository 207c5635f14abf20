//! Process-wide map from key to job.

use super::job::{Job, JobSummary};
use crate::core::{Credential, RepoKey, ResultPayload, SubmitStatus};
use crate::events::PipelineEvent;
use crate::pipeline::PipelineRunner;
use crate::status_log::StatusLog;
use crate::worker::{completion, Completer, ShutdownMode, WorkerPool};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Deduplicates pipeline executions by key.
///
/// The first submission for a key creates its [`Job`] and dispatches the
/// pipeline; every later submission gets the same job back. Jobs are never
/// evicted, so a key runs at most once for the registry's lifetime.
pub struct JobRegistry {
    jobs: DashMap<RepoKey, Arc<Job>>,
    pool: Arc<WorkerPool>,
    runner: Arc<PipelineRunner>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.jobs.len())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl JobRegistry {
    /// Creates an empty registry dispatching to `pool`.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>, runner: Arc<PipelineRunner>) -> Self {
        Self {
            jobs: DashMap::new(),
            pool,
            runner,
        }
    }

    /// Returns the job for `key`, creating and dispatching it if needed.
    ///
    /// The credential is only used when this call creates the job; a later
    /// submitter's credential is dropped unread. Never blocks on the
    /// pipeline.
    pub fn submit(&self, key: RepoKey, credential: Credential) -> (SubmitStatus, Arc<Job>) {
        let (completer, job) = match self.jobs.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let job = Arc::clone(entry.get());
                drop(entry);
                let status = if job.is_done() {
                    SubmitStatus::AlreadyDone
                } else {
                    SubmitStatus::AlreadyRunning
                };
                debug!(key = %key, status = %status, "Reusing existing job");
                return (status, job);
            }
            Entry::Vacant(entry) => {
                let (completer, handle) = completion(key.as_str());
                let job = Arc::new(Job::new(key.clone(), handle));
                entry.insert(Arc::clone(&job));
                (completer, job)
            }
        };

        // The shard lock is released; lookups see the pending job already.
        self.dispatch(&job, completer, credential);
        (SubmitStatus::Submitted, job)
    }

    fn dispatch(&self, job: &Job, completer: Completer<ResultPayload>, credential: Credential) {
        let key = job.key().clone();
        let run_id = job.run_id();
        let runner = Arc::clone(&self.runner);
        let span = info_span!("pipeline", key = %key, run_id = %run_id);

        // A queued job must not show stages persisted by an earlier process.
        if let Err(err) = StatusLog::open(self.runner.cache().layout(), &key).reset() {
            warn!(key = %key, error = %err, "Failed to clear status log before queueing");
        }

        info!(key = %key, run_id = %run_id, "Dispatching pipeline");
        self.runner.events().try_emit(PipelineEvent::JobSubmitted {
            key: key.clone(),
            run_id,
        });

        self.pool.execute(completer, move || {
            async move { runner.run(&key, &credential).await }.instrument(span)
        });
    }

    /// Returns the job for `key`, if one was ever submitted.
    #[must_use]
    pub fn lookup(&self, key: &RepoKey) -> Option<Arc<Job>> {
        self.jobs.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns a summary of every job, oldest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self.jobs.iter().map(|entry| entry.value().summary()).collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.key.cmp(&b.key)));
        jobs
    }

    /// Returns the number of known jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if nothing was ever submitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Stops the worker pool. Jobs submitted afterwards fail immediately.
    pub fn shutdown(&self, mode: ShutdownMode) {
        self.pool.shutdown(mode);
    }
}
