//! # Repohealth
//!
//! Deduplicated, cached and observable repository analysis jobs.
//!
//! Repohealth accepts requests keyed by a repository name, fetches and
//! derives data about that repository from slow external sources, and does
//! so at most once per key even under concurrent requests. It provides:
//!
//! - **Job registry**: one pipeline execution per key, shared by every caller
//! - **Worker pool**: pipelines run on dedicated threads, off the request path
//! - **Stage cache**: per-key artifacts on disk so a restart skips finished work
//! - **Status log**: persisted stage transitions any process can poll
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use repohealth::prelude::*;
//!
//! let config = ServiceConfig::new().with_env_overrides()?;
//! let service = RepoHealthService::from_config(config, analyzer)?;
//!
//! let submitted = service.submit("acme/widgets", Credential::new(token));
//! let status = service.status("acme/widgets");
//! if let ResultResponse::Ready(payload) = service.result("acme/widgets") {
//!     println!("{}", payload.to_json());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod git_mirror;
pub mod jobs;
pub mod observability;
pub mod pipeline;
pub mod ports;
pub mod service;
pub mod status_log;
pub mod testing;
pub mod utils;
pub mod worker;

#[cfg(feature = "github")]
pub mod github;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheTier, StageCache, StorageLayout};
    pub use crate::config::{GithubConfig, LogConfig, LogFormat, ServiceConfig};
    pub use crate::core::{Credential, QueryState, RepoKey, ResultPayload, SubmitStatus};
    pub use crate::errors::{ErrorKind, ErrorReport, RepoHealthError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::git_mirror::GitCliMirror;
    pub use crate::jobs::{Job, JobRegistry, JobState, JobSummary};
    pub use crate::observability::init_tracing;
    pub use crate::pipeline::{PipelineRunner, Stage};
    pub use crate::ports::{Analyzer, Collaborators, MirrorSource, RemoteFetcher, RepoIdentity};
    pub use crate::service::{RepoHealthService, ResultResponse, StatusResponse, SubmitResponse};
    pub use crate::status_log::{StatusEntry, StatusLog};
    pub use crate::utils::Timestamp;
    pub use crate::worker::{JobHandle, Outcome, ShutdownMode, WorkerPool};

    #[cfg(feature = "github")]
    pub use crate::github::GithubFetcher;
}
