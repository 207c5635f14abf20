//! Write-then-rename file publishing.
//!
//! Readers only ever see either the previous complete file or the new
//! complete file: content goes to a sibling `.tmp` path first and is then
//! renamed over the destination.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replaces `path` with `bytes`.
///
/// # Errors
///
/// Returns any IO error; on error the destination is left untouched and the
/// temporary file is removed.
pub fn publish_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path_for(path);
    let written = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();

    if let Err(err) = written.and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

/// Serializes `value` as JSON and publishes it atomically.
///
/// # Errors
///
/// Returns an IO error if serialization or the write fails.
pub fn write_json_atomically<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec(value).map_err(io::Error::other)?;
    publish_atomically(path, &bytes)
}

/// Reads and parses a JSON file.
///
/// Returns `Ok(None)` if the file does not exist.
///
/// # Errors
///
/// Returns [`ReadJsonError::Io`] for unreadable files and
/// [`ReadJsonError::Parse`] for files that are not valid JSON.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ReadJsonError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(ReadJsonError::Io(err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(ReadJsonError::Parse)
}

/// Failure reading a JSON file.
#[derive(Debug, thiserror::Error)]
pub enum ReadJsonError {
    /// The file exists but could not be read.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// The file was read but is not valid JSON for the target type.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_creates_parent_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("value.json");

        write_json_atomically(&path, &serde_json::json!({"a": 1})).unwrap();

        assert!(path.exists());
        assert!(!temp_path_for(&path).exists());
        let value: serde_json::Value = read_json(&path).unwrap().unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_publish_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");

        write_json_atomically(&path, &vec![1, 2]).unwrap();
        write_json_atomically(&path, &vec![3]).unwrap();

        let value: Vec<i32> = read_json(&path).unwrap().unwrap();
        assert_eq!(value, vec![3]);
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<serde_json::Value> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_read_garbage_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"{not json").unwrap();

        let result = read_json::<serde_json::Value>(&path);
        assert!(matches!(result, Err(ReadJsonError::Parse(_))));
    }
}
