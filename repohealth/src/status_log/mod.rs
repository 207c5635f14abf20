//! Persisted per-key progress log.
//!
//! The log is an ordered list of [`StatusEntry`] values. Only the last entry
//! may be open (no `end`); starting a new stage closes it first. Every
//! mutation republishes the whole file via write-then-rename so that any
//! process can read it without coordinating with the writer.

use crate::cache::StorageLayout;
use crate::core::RepoKey;
use crate::utils::{read_json, write_json_atomically, ReadJsonError, Timestamp};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// One stage span in the status log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    /// Machine-readable stage name.
    pub stage: String,
    /// Human-readable description.
    pub message: String,
    /// When the stage started.
    pub start: Timestamp,
    /// When the stage ended, if it has.
    #[serde(default)]
    pub end: Option<Timestamp>,
}

impl StatusEntry {
    /// Returns true if the stage has not been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Returns the span duration in milliseconds, if closed.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.end.map(|end| (end - self.start).num_milliseconds())
    }
}

/// Writer for one key's status log.
///
/// Exactly one pipeline execution owns a writer for a key at a time; readers
/// use [`StatusLog::read`] and never take a lock.
#[derive(Debug)]
pub struct StatusLog {
    path: PathBuf,
    entries: Vec<StatusEntry>,
}

impl StatusLog {
    /// Opens the log for `key`, resuming whatever entries are persisted.
    #[must_use]
    pub fn open(layout: &StorageLayout, key: &RepoKey) -> Self {
        Self::open_at(layout.status_path(key))
    }

    /// Opens a log stored at an explicit path.
    #[must_use]
    pub fn open_at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = Self::read_at(&path);
        Self { path, entries }
    }

    /// Reads the persisted log for `key`.
    ///
    /// Returns an empty list when nothing has been written yet.
    #[must_use]
    pub fn read(layout: &StorageLayout, key: &RepoKey) -> Vec<StatusEntry> {
        Self::read_at(&layout.status_path(key))
    }

    /// Reads a log stored at an explicit path.
    #[must_use]
    pub fn read_at(path: &Path) -> Vec<StatusEntry> {
        for attempt in 0..2 {
            match read_json::<Vec<StatusEntry>>(path) {
                Ok(entries) => return entries.unwrap_or_default(),
                Err(ReadJsonError::Parse(err)) if attempt == 0 => {
                    tracing::debug!(path = %path.display(), error = %err, "Status log unreadable, retrying");
                }
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "Status log unreadable, treating as empty");
                    return Vec::new();
                }
            }
        }
        Vec::new()
    }

    /// Returns the entries as currently held by this writer.
    #[must_use]
    pub fn entries(&self) -> &[StatusEntry] {
        &self.entries
    }

    /// Returns the open entry, if any.
    #[must_use]
    pub fn open_entry(&self) -> Option<&StatusEntry> {
        self.entries.last().filter(|e| e.is_open())
    }

    /// Returns the path the log is published to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clears the log and publishes the empty sequence.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the log cannot be written.
    pub fn reset(&mut self) -> io::Result<()> {
        self.entries.clear();
        self.publish()
    }

    /// Closes the open entry, if any, and opens a new one.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the log cannot be written.
    pub fn begin_stage(
        &mut self,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) -> io::Result<()> {
        let now = crate::utils::now_utc();
        self.close_open(now);
        self.entries.push(StatusEntry {
            stage: stage.into(),
            message: message.into(),
            start: now,
            end: None,
        });
        self.publish()
    }

    /// Closes the open entry.
    ///
    /// A no-op (no write) when nothing is open.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the log cannot be written.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.close_open(crate::utils::now_utc()) {
            self.publish()
        } else {
            Ok(())
        }
    }

    fn close_open(&mut self, now: Timestamp) -> bool {
        match self.entries.last_mut() {
            Some(last) if last.is_open() => {
                last.end = Some(now.max(last.start));
                true
            }
            _ => false,
        }
    }

    fn publish(&self) -> io::Result<()> {
        write_json_atomically(&self.path, &self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_log() -> (tempfile::TempDir, StorageLayout, RepoKey) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        let key = RepoKey::parse("acme/widgets").unwrap();
        (dir, layout, key)
    }

    fn assert_single_open_tail(entries: &[StatusEntry]) {
        let open: Vec<_> = entries.iter().enumerate().filter(|(_, e)| e.is_open()).collect();
        assert!(open.len() <= 1);
        if let Some((idx, _)) = open.first() {
            assert_eq!(*idx, entries.len() - 1);
        }
    }

    #[test]
    fn test_read_before_any_write_is_empty() {
        let (_dir, layout, key) = test_log();
        assert!(StatusLog::read(&layout, &key).is_empty());
    }

    #[test]
    fn test_begin_stage_closes_previous() {
        let (_dir, layout, key) = test_log();
        let mut log = StatusLog::open(&layout, &key);

        log.begin_stage("resolve-identity", "Resolving").unwrap();
        log.begin_stage("fetch-remote-metadata", "Fetching").unwrap();

        let persisted = StatusLog::read(&layout, &key);
        assert_eq!(persisted.len(), 2);
        assert!(!persisted[0].is_open());
        assert!(persisted[1].is_open());
        assert_eq!(persisted[0].end, Some(persisted[1].start));
        assert_single_open_tail(&persisted);
    }

    #[test]
    fn test_finish_closes_last_entry() {
        let (_dir, layout, key) = test_log();
        let mut log = StatusLog::open(&layout, &key);

        log.begin_stage("resolve-identity", "Resolving").unwrap();
        log.finish().unwrap();
        log.finish().unwrap();

        let persisted = StatusLog::read(&layout, &key);
        assert_eq!(persisted.len(), 1);
        assert!(persisted.iter().all(|e| !e.is_open()));
        assert!(persisted[0].duration_ms().unwrap() >= 0);
        assert!(log.open_entry().is_none());
    }

    #[test]
    fn test_reset_clears_persisted_entries() {
        let (_dir, layout, key) = test_log();
        let mut log = StatusLog::open(&layout, &key);
        log.begin_stage("a", "A").unwrap();

        let mut fresh = StatusLog::open(&layout, &key);
        assert_eq!(fresh.entries().len(), 1);
        fresh.reset().unwrap();

        assert!(StatusLog::read(&layout, &key).is_empty());
    }

    #[test]
    fn test_open_resumes_existing_entries() {
        let (_dir, layout, key) = test_log();
        let mut first = StatusLog::open(&layout, &key);
        first.begin_stage("a", "A").unwrap();

        let mut resumed = StatusLog::open(&layout, &key);
        resumed.begin_stage("b", "B").unwrap();

        let persisted = StatusLog::read(&layout, &key);
        let stages: Vec<_> = persisted.iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(stages, vec!["a", "b"]);
        assert_single_open_tail(&persisted);
    }

    #[test]
    fn test_corrupt_log_reads_as_empty() {
        let (_dir, layout, key) = test_log();
        let path = layout.status_path(&key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"[{\"stage\": ").unwrap();

        assert!(StatusLog::read(&layout, &key).is_empty());
    }

    #[test]
    fn test_entry_serialization_shape() {
        let entry = StatusEntry {
            stage: "fetch-remote-issues".to_string(),
            message: "Fetching issues".to_string(),
            start: crate::utils::now_utc(),
            end: None,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json["end"].is_null());
        assert_eq!(json["stage"], "fetch-remote-issues");
    }
}
