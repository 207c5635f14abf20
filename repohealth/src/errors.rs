//! Error types for repohealth.
//!
//! `RepoHealthError` is the error returned by collaborators, cache tiers and
//! the pipeline. Because a job's terminal error has to be replayed to every
//! later result query, it is also captured as a cloneable [`ErrorReport`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for repohealth operations.
#[derive(Debug, Error)]
pub enum RepoHealthError {
    /// The key does not resolve to anything upstream.
    #[error("Repository \"{key}\" not found")]
    NotFound {
        /// The key that failed to resolve.
        key: String,
    },

    /// The credential was rejected upstream.
    #[error("Authentication failed: {message}")]
    AuthFailure {
        /// Upstream explanation, never containing the credential.
        message: String,
    },

    /// The upstream API refused the request because of rate limiting.
    #[error("Rate limited by upstream: {message}")]
    RateLimited {
        /// Upstream explanation.
        message: String,
        /// Seconds until the limit resets, when known.
        retry_after_seconds: Option<u64>,
    },

    /// A transient network problem.
    #[error("Network failure: {message}")]
    NetworkFailure {
        /// What was being attempted.
        message: String,
        /// The underlying transport error, if any.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A persisted cache artifact could not be parsed.
    #[error("Corrupt {tier} artifact at {}", path.display())]
    CorruptArtifact {
        /// The tier the artifact belongs to.
        tier: String,
        /// Where the artifact lives on disk.
        path: PathBuf,
        /// The parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A generic producer failure.
    #[error("Pipeline failure: {message}")]
    PipelineFailure {
        /// Summary of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The job for the key has not finished yet.
    #[error("Result for \"{key}\" is not ready")]
    NotReady {
        /// The key that was queried.
        key: String,
    },

    /// The key could not be used.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A configuration error.
    #[error("{0}")]
    Config(#[from] crate::config::ConfigError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoHealthError {
    /// Creates a not found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an authentication failure.
    #[must_use]
    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::AuthFailure {
            message: message.into(),
        }
    }

    /// Creates a rate limit error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after_seconds: Option<u64>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_seconds,
        }
    }

    /// Creates a network failure without an underlying cause.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a network failure wrapping a transport error.
    #[must_use]
    pub fn network_with(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::NetworkFailure {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a generic pipeline failure.
    #[must_use]
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::PipelineFailure {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a pipeline failure wrapping an underlying cause.
    #[must_use]
    pub fn pipeline_with(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::PipelineFailure {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AuthFailure { .. } => ErrorKind::AuthFailure,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::NetworkFailure { .. } => ErrorKind::NetworkFailure,
            Self::CorruptArtifact { .. } => ErrorKind::CorruptArtifact,
            Self::NotReady { .. } => ErrorKind::NotReady,
            Self::InvalidKey(_) => ErrorKind::InvalidKey,
            Self::Config(_) => ErrorKind::Config,
            Self::PipelineFailure { .. } | Self::Serialization(_) | Self::Io(_) => {
                ErrorKind::PipelineFailure
            }
        }
    }

    /// Returns true for errors a caller may fix by resubmitting later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::NetworkFailure | ErrorKind::RateLimited)
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        ErrorReport::from_error(self).to_dict()
    }
}

impl From<serde_json::Error> for RepoHealthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for RepoHealthError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(inner) => inner,
            Err(err) => Self::PipelineFailure {
                message: err.to_string(),
                source: Some(err),
            },
        }
    }
}

/// Coarse classification of a [`RepoHealthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Key does not resolve upstream.
    NotFound,
    /// Bad or expired credential.
    AuthFailure,
    /// Upstream rate limiting.
    RateLimited,
    /// Transient network problem.
    NetworkFailure,
    /// Unreadable cache artifact.
    CorruptArtifact,
    /// Generic producer error.
    PipelineFailure,
    /// Result queried before completion.
    NotReady,
    /// Key rejected before any work.
    InvalidKey,
    /// Invalid configuration.
    Config,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 9] = [
        Self::NotFound,
        Self::AuthFailure,
        Self::RateLimited,
        Self::NetworkFailure,
        Self::CorruptArtifact,
        Self::PipelineFailure,
        Self::NotReady,
        Self::InvalidKey,
        Self::Config,
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::AuthFailure => write!(f, "auth_failure"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::NetworkFailure => write!(f, "network_failure"),
            Self::CorruptArtifact => write!(f, "corrupt_artifact"),
            Self::PipelineFailure => write!(f, "pipeline_failure"),
            Self::NotReady => write!(f, "not_ready"),
            Self::InvalidKey => write!(f, "invalid_key"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// A cloneable snapshot of a terminal job error.
///
/// Captures the message and the full `source()` chain so that a failure
/// page can explain what went wrong without holding on to the original
/// (non-cloneable) error value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// The error kind.
    pub kind: ErrorKind,
    /// The top-level message.
    pub message: String,
    /// The pipeline stage that failed, if the error came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Messages of the underlying causes, outermost first.
    #[serde(default)]
    pub causes: Vec<String>,
}

impl ErrorReport {
    /// Creates a report with no cause chain.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage: None,
            causes: Vec::new(),
        }
    }

    /// Captures an error and its source chain.
    #[must_use]
    pub fn from_error(err: &RepoHealthError) -> Self {
        let mut causes = Vec::new();
        let mut current = std::error::Error::source(err);
        while let Some(cause) = current {
            causes.push(cause.to_string());
            current = cause.source();
        }

        Self {
            kind: err.kind(),
            message: err.to_string(),
            stage: None,
            causes,
        }
    }

    /// Sets the failing stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Rebuilds an error value carrying this report's message.
    ///
    /// Used at the query boundary, where the original error is long gone.
    #[must_use]
    pub fn to_error(&self) -> RepoHealthError {
        let detail = match &self.stage {
            Some(stage) => format!("[{stage}] {}", self.message),
            None => self.message.clone(),
        };
        let source = (!self.causes.is_empty()).then(|| anyhow::anyhow!(self.causes.join(": ")));

        match self.kind {
            ErrorKind::NotFound => RepoHealthError::NotFound { key: detail },
            ErrorKind::AuthFailure => RepoHealthError::auth_failure(detail),
            ErrorKind::RateLimited => RepoHealthError::rate_limited(detail, None),
            ErrorKind::NetworkFailure => RepoHealthError::NetworkFailure {
                message: detail,
                source,
            },
            ErrorKind::CorruptArtifact => RepoHealthError::CorruptArtifact {
                tier: self.stage.clone().unwrap_or_else(|| "cached".to_string()),
                path: PathBuf::new(),
                source: <serde_json::Error as serde::de::Error>::custom(detail),
            },
            ErrorKind::PipelineFailure => RepoHealthError::PipelineFailure {
                message: detail,
                source,
            },
            ErrorKind::NotReady => RepoHealthError::NotReady { key: detail },
            ErrorKind::InvalidKey => RepoHealthError::InvalidKey(detail),
            ErrorKind::Config => RepoHealthError::Config(crate::config::ConfigError::Invalid {
                field: "config",
                message: detail,
            }),
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind.to_string()));
        map.insert("message".to_string(), serde_json::json!(self.message));

        if let Some(ref stage) = self.stage {
            map.insert("stage".to_string(), serde_json::json!(stage));
        }
        if !self.causes.is_empty() {
            map.insert("causes".to_string(), serde_json::json!(self.causes));
        }

        map
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref stage) = self.stage {
            write!(f, "[{stage}] ")?;
        }
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(RepoHealthError::not_found("a/b").kind(), ErrorKind::NotFound);
        assert_eq!(RepoHealthError::auth_failure("bad token").kind(), ErrorKind::AuthFailure);
        assert_eq!(RepoHealthError::network("timeout").kind(), ErrorKind::NetworkFailure);
        assert_eq!(RepoHealthError::pipeline("boom").kind(), ErrorKind::PipelineFailure);
        assert_eq!(
            RepoHealthError::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::PipelineFailure
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(RepoHealthError::network("reset").is_transient());
        assert!(RepoHealthError::rate_limited("slow down", Some(60)).is_transient());
        assert!(!RepoHealthError::not_found("a/b").is_transient());
    }

    #[test]
    fn test_report_captures_cause_chain() {
        let inner = anyhow::anyhow!("connection reset").context("reading response");
        let err = RepoHealthError::network_with("fetching issues", inner);

        let report = ErrorReport::from_error(&err).with_stage("fetch-remote-issues");

        assert_eq!(report.kind, ErrorKind::NetworkFailure);
        assert_eq!(report.message, "Network failure: fetching issues");
        assert_eq!(report.stage.as_deref(), Some("fetch-remote-issues"));
        assert_eq!(report.causes[0], "reading response");
        assert!(report.to_string().contains("connection reset"));
    }

    #[test]
    fn test_report_to_dict() {
        let report = ErrorReport::new(ErrorKind::NotFound, "Repository \"a/b\" not found");
        let dict = report.to_dict();

        assert_eq!(dict.get("kind").unwrap(), "not_found");
        assert!(!dict.contains_key("stage"));
    }

    #[test]
    fn test_report_round_trip_keeps_kind() {
        let report = ErrorReport::new(ErrorKind::AuthFailure, "Authentication failed: expired");
        assert_eq!(report.to_error().kind(), ErrorKind::AuthFailure);
    }

    #[test]
    fn test_every_kind_survives_replay() {
        for kind in ErrorKind::ALL {
            let report = ErrorReport::new(kind, "replayed").with_stage("fetch-remote-metadata");
            let err = report.to_error();
            assert_eq!(err.kind(), kind, "{kind} changed on replay");

            let again = ErrorReport::from_error(&err);
            assert!(
                again.message.contains("replayed") || again.causes.iter().any(|c| c.contains("replayed")),
                "{kind} lost its message"
            );
        }
    }

    #[test]
    fn test_not_found_replays_as_not_found() {
        let report = ErrorReport::from_error(&RepoHealthError::not_found("acme/widgets"));
        assert!(matches!(report.to_error(), RepoHealthError::NotFound { .. }));
    }

    #[test]
    fn test_anyhow_downcast_preserves_variant() {
        let err: anyhow::Error = RepoHealthError::not_found("x/y").into();
        let back: RepoHealthError = err.into();
        assert_eq!(back.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_error_kind_serialize() {
        let json = serde_json::to_string(&ErrorKind::RateLimited).unwrap();
        assert_eq!(json, r#""rate_limited""#);
    }
}
