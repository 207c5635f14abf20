//! [`MirrorSource`] that shells out to the `git` command line.

use crate::core::Credential;
use crate::errors::RepoHealthError;
use crate::ports::{MirrorSource, RepoIdentity};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, warn};

/// Clones and refreshes mirrors with `git`.
///
/// Clones use the public clone URL; the credential is not passed to git.
#[derive(Debug, Clone)]
pub struct GitCliMirror {
    program: PathBuf,
}

impl Default for GitCliMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCliMirror {
    /// Uses `git` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }

    /// Uses a specific git executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    async fn git<I, S>(&self, args: I, subject: &str) -> Result<(), RepoHealthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.program)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RepoHealthError::pipeline_with(
                    format!("failed to run {}", self.program.display()),
                    e,
                )
            })?;
        check(&output, subject)
    }
}

fn check(output: &Output, subject: &str) -> Result<(), RepoHealthError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    warn!(subject, status = %output.status, stderr = %stderr.trim(), "git failed");
    Err(classify_failure(&stderr, subject))
}

/// Maps git's stderr to an error kind.
fn classify_failure(stderr: &str, subject: &str) -> RepoHealthError {
    if stderr.to_ascii_lowercase().contains("not found") {
        RepoHealthError::not_found(subject)
    } else {
        RepoHealthError::network(format!("git failed for {subject}: {}", stderr.trim()))
    }
}

#[async_trait]
impl MirrorSource for GitCliMirror {
    async fn clone_mirror(
        &self,
        identity: &RepoIdentity,
        _credential: &Credential,
        dest: &Path,
    ) -> Result<(), RepoHealthError> {
        debug!(clone_url = %identity.clone_url, dest = %dest.display(), "git clone");
        self.git(
            [
                OsStr::new("clone"),
                OsStr::new("--quiet"),
                OsStr::new(&identity.clone_url),
                dest.as_os_str(),
            ],
            &identity.full_name,
        )
        .await
    }

    async fn update(&self, mirror: &Path, _credential: &Credential) -> Result<(), RepoHealthError> {
        debug!(mirror = %mirror.display(), "git fetch");
        self.git(
            [
                OsStr::new("-C"),
                mirror.as_os_str(),
                OsStr::new("fetch"),
                OsStr::new("--all"),
                OsStr::new("--quiet"),
            ],
            &mirror.display().to_string(),
        )
        .await
    }
}
