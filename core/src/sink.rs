//! Local byte storage for upload staging and downloaded files.
//!
//! Upload bodies are written to a file before the transport sees them, and
//! downloaded files are copied out of the transport's transient location
//! before the response adapter runs. Both are blocking local I/O performed
//! synchronously on the calling (or callback) thread.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error};
use uuid::Uuid;

use crate::error::RestError;

pub trait ByteSink: Send + Sync {
    /// Write `bytes` to a fresh location and return it.
    fn write(&self, bytes: &[u8]) -> Result<PathBuf, RestError>;

    /// Copy the file at `location` to a fresh location owned by the caller.
    fn persist(&self, location: &Path) -> Result<PathBuf, RestError>;

    /// Best-effort removal of a location this sink produced.
    fn discard(&self, location: &Path) {
        let _ = fs::remove_file(location);
    }
}

/// Writes into a directory, the system temp dir by default.
#[derive(Debug, Clone)]
pub struct TempDirSink {
    dir: PathBuf,
}

impl TempDirSink {
    pub fn new() -> Self {
        Self::in_dir(std::env::temp_dir())
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for TempDirSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteSink for TempDirSink {
    fn write(&self, bytes: &[u8]) -> Result<PathBuf, RestError> {
        let location = self.dir.join(format!("rspu-{}", Uuid::new_v4()));
        fs::write(&location, bytes).map_err(|err| {
            error!(path = %location.display(), error = %err, "failed to stage request body");
            RestError::WriteFailure(err.to_string())
        })?;
        debug!(path = %location.display(), len = bytes.len(), "staged request body");
        Ok(location)
    }

    fn persist(&self, location: &Path) -> Result<PathBuf, RestError> {
        let target = self.dir.join(format!("rs-downloaded-{}", Uuid::new_v4()));
        fs::copy(location, &target).map_err(|err| {
            error!(from = %location.display(), error = %err, "failed to copy downloaded file");
            RestError::FileSystemFailure(err.to_string())
        })?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_persist() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TempDirSink::in_dir(dir.path());
        let staged = sink.write(b"hello").unwrap();
        assert_eq!(fs::read(&staged).unwrap(), b"hello");

        let copy = sink.persist(&staged).unwrap();
        assert_ne!(copy, staged);
        sink.discard(&staged);
        assert!(!staged.exists());
        assert_eq!(fs::read(&copy).unwrap(), b"hello");
    }

    #[test]
    fn write_into_missing_dir_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TempDirSink::in_dir(dir.path().join("missing"));
        let err = sink.write(b"x").unwrap_err();
        assert!(matches!(err, RestError::WriteFailure(_)));
    }

    #[test]
    fn persist_of_missing_file_is_file_system_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TempDirSink::in_dir(dir.path());
        let err = sink.persist(&dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, RestError::FileSystemFailure(_)));
    }
}
