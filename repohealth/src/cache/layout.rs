//! On-disk layout of per-key storage roots.

use super::CacheTier;
use crate::core::RepoKey;
use std::path::{Path, PathBuf};

/// File name of the status log inside a key's storage root.
pub const STATUS_FILE: &str = "status.json";
/// Directory name of the local mirror inside a key's storage root.
pub const MIRROR_DIR: &str = "mirror";
const MIRROR_STAGING_DIR: &str = "mirror.staging";

/// Maps keys to paths under a storage root.
///
/// ```text
/// <root>/<sanitized key>/identity.json
///                        metadata.json
///                        issues.json
///                        stargazers.json
///                        analysis.json
///                        status.json
///                        mirror/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory owned by `key`.
    #[must_use]
    pub fn key_dir(&self, key: &RepoKey) -> PathBuf {
        self.root.join(key.storage_component())
    }

    /// Returns the artifact path for a tier.
    #[must_use]
    pub fn artifact_path(&self, key: &RepoKey, tier: CacheTier) -> PathBuf {
        self.key_dir(key).join(tier.file_name())
    }

    /// Returns the status log path.
    #[must_use]
    pub fn status_path(&self, key: &RepoKey) -> PathBuf {
        self.key_dir(key).join(STATUS_FILE)
    }

    /// Returns the local mirror directory.
    #[must_use]
    pub fn mirror_dir(&self, key: &RepoKey) -> PathBuf {
        self.key_dir(key).join(MIRROR_DIR)
    }

    /// Returns the directory fresh clones are made in before publishing.
    #[must_use]
    pub fn mirror_staging_dir(&self, key: &RepoKey) -> PathBuf {
        self.key_dir(key).join(MIRROR_STAGING_DIR)
    }
}
