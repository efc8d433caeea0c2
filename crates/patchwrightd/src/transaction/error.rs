//! Error types for transactional file mutation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::{TransactionId, TransactionState};
use crate::concurrency::JobPanicked;
use crate::diff::ApplyError;

/// Errors raised while staging, applying, committing, or rolling back.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// No transaction with this id is known to the manager.
    #[error("unknown transaction {id}")]
    UnknownTransaction {
        /// Requested transaction id.
        id: TransactionId,
    },

    /// The transaction already reached a terminal state.
    #[error("transaction {id} is already {state}")]
    Terminal {
        /// Transaction id.
        id: TransactionId,
        /// Terminal state it reached.
        state: TransactionState,
    },

    /// Reading, writing, or removing a file failed.
    #[error("failed to {action} {path}: {source}")]
    Io {
        /// Affected file.
        path: PathBuf,
        /// What was being attempted, e.g. `write`.
        action: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A diff did not apply to the file's current content.
    #[error("{path}: {source}")]
    Diff {
        /// Affected file.
        path: PathBuf,
        /// Underlying apply failure.
        #[source]
        source: ApplyError,
    },

    /// A diff targeted a file whose content is not UTF-8 text.
    #[error("{path} is not valid UTF-8 and cannot be patched")]
    NotText {
        /// Affected file.
        path: PathBuf,
    },

    /// Applying an operation panicked; the batch is treated as failed.
    #[error(transparent)]
    Panicked(#[from] JobPanicked),

    /// Rollback could not restore every staged path.
    #[error("rollback of transaction {id} left {} path(s) inconsistent: {}", .paths.len(), display_paths(.paths))]
    Integrity {
        /// Transaction id.
        id: TransactionId,
        /// Every path whose original state could not be restored.
        paths: Vec<PathBuf>,
    },
}

impl TransactionError {
    pub(crate) fn io(path: impl Into<PathBuf>, action: &'static str, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            action,
            source,
        }
    }

    /// Reason text without the path prefix, used in batch failure reports.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Diff { source, .. } => source.to_string(),
            Self::Io { action, source, .. } => format!("failed to {action}: {source}"),
            other => other.to_string(),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
