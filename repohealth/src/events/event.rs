//! Pipeline lifecycle events.

use crate::core::RepoKey;
use crate::errors::ErrorReport;
use serde::Serialize;
use uuid::Uuid;

/// Something notable that happened while coordinating or running a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A new job was created and dispatched to the worker pool.
    JobSubmitted {
        /// The job key.
        key: RepoKey,
        /// Correlation id for the job.
        run_id: Uuid,
    },
    /// A stage started.
    StageStarted {
        /// The job key.
        key: RepoKey,
        /// The logged stage name.
        stage: String,
        /// Whether the stage is loading a cached artifact.
        cached: bool,
    },
    /// A stage finished successfully.
    StageCompleted {
        /// The job key.
        key: RepoKey,
        /// The logged stage name.
        stage: String,
        /// Wall-clock duration.
        duration_ms: f64,
    },
    /// A cached artifact could not be parsed and will be re-produced.
    CorruptArtifact {
        /// The job key.
        key: RepoKey,
        /// The tier that was corrupt.
        tier: String,
        /// Parser message.
        error: String,
    },
    /// The pipeline produced a result.
    JobSucceeded {
        /// The job key.
        key: RepoKey,
        /// Total pipeline duration.
        duration_ms: f64,
    },
    /// The pipeline failed.
    JobFailed {
        /// The job key.
        key: RepoKey,
        /// The captured error.
        error: ErrorReport,
    },
}

impl PipelineEvent {
    /// Returns the dotted event type, e.g. `stage.started`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobSubmitted { .. } => "job.submitted",
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::CorruptArtifact { .. } => "cache.corrupt",
            Self::JobSucceeded { .. } => "job.succeeded",
            Self::JobFailed { .. } => "job.failed",
        }
    }

    /// Returns the key the event concerns.
    #[must_use]
    pub fn key(&self) -> &RepoKey {
        match self {
            Self::JobSubmitted { key, .. }
            | Self::StageStarted { key, .. }
            | Self::StageCompleted { key, .. }
            | Self::CorruptArtifact { key, .. }
            | Self::JobSucceeded { key, .. }
            | Self::JobFailed { key, .. } => key,
        }
    }

    /// Serializes the event payload.
    #[must_use]
    pub fn to_data(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
