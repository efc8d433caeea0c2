//! Pre-mutation copies of staged files.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::error::TransactionError;

/// A file's state as first observed by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    path: PathBuf,
    bytes: Vec<u8>,
    existed: bool,
    captured_at: SystemTime,
}

impl FileSnapshot {
    /// Reads `path` into a snapshot. A missing file is recorded as absent.
    pub(super) fn capture(path: &Path) -> Result<Self, TransactionError> {
        let (bytes, existed) = match fs::read(path) {
            Ok(bytes) => (bytes, true),
            Err(error) if error.kind() == ErrorKind::NotFound => (Vec::new(), false),
            Err(error) => return Err(TransactionError::io(path, "snapshot", error)),
        };
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            existed,
            captured_at: SystemTime::now(),
        })
    }

    /// Snapshotted path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Original content; empty when the file did not exist.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the file existed when captured.
    #[must_use]
    pub const fn existed(&self) -> bool {
        self.existed
    }

    /// When the snapshot was taken.
    #[must_use]
    pub const fn captured_at(&self) -> SystemTime {
        self.captured_at
    }
}
