//! Submission and query state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a submission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    /// A new job was created and dispatched.
    Submitted,
    /// A job for the key already exists and is still running.
    AlreadyRunning,
    /// A job for the key already reached a terminal state.
    AlreadyDone,
    /// The key could not be parsed; nothing was created.
    Rejected,
}

impl fmt::Display for SubmitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::AlreadyRunning => write!(f, "already_running"),
            Self::AlreadyDone => write!(f, "already_done"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl SubmitStatus {
    /// Returns true if this request created the job.
    #[must_use]
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Submitted)
    }
}

/// Externally visible state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    /// No job exists for the key.
    Pending,
    /// The job is executing.
    Running,
    /// The job finished successfully.
    Done,
    /// The job finished with an error.
    Failed,
}

impl Default for QueryState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl QueryState {
    /// Returns true if the state represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_status_display() {
        assert_eq!(SubmitStatus::Submitted.to_string(), "submitted");
        assert_eq!(SubmitStatus::AlreadyRunning.to_string(), "already_running");
        assert_eq!(SubmitStatus::AlreadyDone.to_string(), "already_done");
        assert!(SubmitStatus::Submitted.is_new());
        assert!(!SubmitStatus::AlreadyDone.is_new());
    }

    #[test]
    fn test_query_state_is_terminal() {
        assert!(QueryState::Done.is_terminal());
        assert!(QueryState::Failed.is_terminal());
        assert!(!QueryState::Pending.is_terminal());
        assert!(!QueryState::Running.is_terminal());
    }

    #[test]
    fn test_query_state_serialize() {
        let json = serde_json::to_string(&QueryState::Running).unwrap();
        assert_eq!(json, r#""running""#);

        let state: QueryState = serde_json::from_str(r#""failed""#).unwrap();
        assert_eq!(state, QueryState::Failed);
    }

    #[test]
    fn test_query_state_default() {
        assert_eq!(QueryState::default(), QueryState::Pending);
    }
}
