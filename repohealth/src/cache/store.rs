//! Per-key, per-tier artifact storage.

use super::{CacheTier, StorageLayout};
use crate::core::RepoKey;
use crate::errors::RepoHealthError;
use crate::utils::{read_json, write_json_atomically, ReadJsonError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

/// Persistent stage artifacts for every key under one storage root.
///
/// For a given key, writes only ever come from the single pipeline execution
/// that owns the key's job, so the cache itself takes no locks.
#[derive(Debug, Clone)]
pub struct StageCache {
    layout: StorageLayout,
}

impl StageCache {
    /// Creates a cache over `layout`.
    #[must_use]
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Creates a cache rooted at `root`.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self::new(StorageLayout::new(root))
    }

    /// Returns the storage layout.
    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Returns true if the tier artifact has been written for `key`.
    #[must_use]
    pub fn has_artifact(&self, key: &RepoKey, tier: CacheTier) -> bool {
        self.layout.artifact_path(key, tier).is_file()
    }

    /// Loads a tier artifact.
    ///
    /// # Errors
    ///
    /// Returns [`RepoHealthError::CorruptArtifact`] if the file does not
    /// parse, or an IO error if it cannot be read (including when missing).
    pub fn load<T: DeserializeOwned>(
        &self,
        key: &RepoKey,
        tier: CacheTier,
    ) -> Result<T, RepoHealthError> {
        let path = self.layout.artifact_path(key, tier);
        match read_json(&path) {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(RepoHealthError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no {tier} artifact at {}", path.display()),
            ))),
            Err(ReadJsonError::Io(err)) => Err(RepoHealthError::Io(err)),
            Err(ReadJsonError::Parse(source)) => Err(RepoHealthError::CorruptArtifact {
                tier: tier.to_string(),
                path,
                source,
            }),
        }
    }

    /// Publishes a tier artifact.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the artifact cannot be written.
    pub fn store<T: Serialize + ?Sized>(
        &self,
        key: &RepoKey,
        tier: CacheTier,
        value: &T,
    ) -> Result<(), RepoHealthError> {
        write_json_atomically(&self.layout.artifact_path(key, tier), value)?;
        Ok(())
    }

    /// Removes a tier artifact, if present.
    ///
    /// # Errors
    ///
    /// Returns any IO error other than the file not existing.
    pub fn discard(&self, key: &RepoKey, tier: CacheTier) -> Result<(), RepoHealthError> {
        remove_file_if_exists(&self.layout.artifact_path(key, tier))?;
        Ok(())
    }

    /// Runs `producer` and publishes its output.
    ///
    /// Nothing is written when the producer fails.
    ///
    /// # Errors
    ///
    /// Propagates the producer's error, or an IO error from the write.
    pub async fn produce_and_store<T, F, Fut>(
        &self,
        key: &RepoKey,
        tier: CacheTier,
        producer: F,
    ) -> Result<T, RepoHealthError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RepoHealthError>>,
    {
        let value = producer().await?;
        self.store(key, tier, &value)?;
        tracing::debug!(key = %key, tier = %tier, "Stored artifact");
        Ok(value)
    }

    /// Returns true if a published mirror exists for `key`.
    #[must_use]
    pub fn has_mirror(&self, key: &RepoKey) -> bool {
        self.layout.mirror_dir(key).is_dir()
    }

    /// Returns the published mirror directory for `key`.
    #[must_use]
    pub fn mirror_dir(&self, key: &RepoKey) -> PathBuf {
        self.layout.mirror_dir(key)
    }

    /// Returns a clean, not-yet-existing staging path for a fresh clone.
    ///
    /// Leftovers from an interrupted clone are removed first.
    ///
    /// # Errors
    ///
    /// Returns an IO error if leftovers cannot be removed.
    pub fn prepare_mirror_staging(&self, key: &RepoKey) -> Result<PathBuf, RepoHealthError> {
        let staging = self.layout.mirror_staging_dir(key);
        remove_dir_if_exists(&staging)?;
        if let Some(parent) = staging.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(staging)
    }

    /// Moves a completed staging clone into the published mirror location.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the rename fails.
    pub fn publish_mirror(&self, key: &RepoKey, staging: &Path) -> Result<PathBuf, RepoHealthError> {
        let target = self.layout.mirror_dir(key);
        remove_dir_if_exists(&target)?;
        std::fs::rename(staging, &target)?;
        Ok(target)
    }

    /// Removes a staging clone after a failed clone.
    pub fn discard_mirror_staging(&self, staging: &Path) {
        if let Err(err) = remove_dir_if_exists(staging) {
            tracing::warn!(path = %staging.display(), error = %err, "Failed to remove mirror staging dir");
        }
    }

    /// Removes everything stored for `key`.
    ///
    /// Maintenance only: a job that has already run for the key is not
    /// affected and will not be re-run by the registry.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be removed.
    pub fn purge(&self, key: &RepoKey) -> Result<(), RepoHealthError> {
        remove_dir_if_exists(&self.layout.key_dir(key))?;
        tracing::info!(key = %key, "Purged storage root");
        Ok(())
    }
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
