//! Transactional multi-file mutation with guaranteed rollback.
//!
//! A transaction snapshots every path the first time it is touched, then
//! mutates files in place through atomic replacement. Committing discards the
//! snapshots without touching the filesystem; rolling back restores every
//! snapshot in reverse staging order, deleting files that did not exist
//! before the transaction.
//!
//! Operations on distinct paths may run concurrently within one transaction.
//! Callers must not run two operations on the same path at once; the
//! [`crate::concurrency::ConcurrencyLimiter`] serialises them.

mod atomic;
mod error;
mod snapshot;

#[cfg(test)]
mod tests;

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use indexmap::IndexMap;
use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, warn};

pub use error::TransactionError;
pub use snapshot::FileSnapshot;

use crate::diff::{DiffEngine, UnifiedDiff};

const TRANSACTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transaction");

/// Opaque transaction identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TransactionId(u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Lifecycle of a transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Opened; nothing written yet.
    Pending,
    /// At least one operation has been applied.
    Applying,
    /// Changes kept; snapshots discarded.
    Committed,
    /// Snapshots restored.
    RolledBack,
}

impl TransactionState {
    /// Returns true for states that accept no further work.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Mutation applied to one file.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum OperationKind {
    /// Replace the file's content, creating it when absent.
    Write(Vec<u8>),
    /// Patch the file's current content.
    ApplyDiff(UnifiedDiff),
    /// Remove the file.
    Delete,
}

/// A single-file mutation within a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Target file.
    pub path: PathBuf,
    /// What to do with it.
    pub kind: OperationKind,
}

impl Operation {
    /// Replaces `path` with `bytes`.
    #[must_use]
    pub fn write(path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            kind: OperationKind::Write(bytes.into()),
        }
    }

    /// Applies `diff` to `path`.
    #[must_use]
    pub fn apply_diff(path: impl Into<PathBuf>, diff: UnifiedDiff) -> Self {
        Self {
            path: path.into(),
            kind: OperationKind::ApplyDiff(diff),
        }
    }

    /// Deletes `path`.
    #[must_use]
    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: OperationKind::Delete,
        }
    }

    /// Short name of the operation kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        (&self.kind).into()
    }
}

/// File content immediately before and after an applied operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    /// Target file.
    pub path: PathBuf,
    /// Content before the operation, `None` when the file was absent.
    pub before: Option<Vec<u8>>,
    /// Content after the operation, `None` when the file was deleted.
    pub after: Option<Vec<u8>>,
}

#[derive(Debug)]
struct LoggedOperation {
    path: PathBuf,
    kind: &'static str,
}

#[derive(Debug)]
struct Transaction {
    id: TransactionId,
    state: TransactionState,
    log: Vec<LoggedOperation>,
    snapshots: IndexMap<PathBuf, FileSnapshot>,
    created_dirs: Vec<PathBuf>,
}

impl Transaction {
    fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Pending,
            log: Vec::new(),
            snapshots: IndexMap::new(),
            created_dirs: Vec::new(),
        }
    }

    fn ensure_open(&self) -> Result<(), TransactionError> {
        if self.state.is_terminal() {
            return Err(TransactionError::Terminal {
                id: self.id,
                state: self.state,
            });
        }
        Ok(())
    }
}

/// Owns every open transaction and the snapshots backing them.
#[derive(Debug)]
pub struct TransactionManager {
    transactions: DashMap<TransactionId, Arc<Mutex<Transaction>>>,
    next_id: AtomicU64,
    diff: DiffEngine,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(DiffEngine::default())
    }
}

impl TransactionManager {
    /// Creates a manager that applies diffs with `diff`.
    #[must_use]
    pub fn new(diff: DiffEngine) -> Self {
        Self {
            transactions: DashMap::new(),
            next_id: AtomicU64::new(1),
            diff,
        }
    }

    /// Opens a new transaction.
    pub fn begin(&self) -> TransactionId {
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.transactions
            .insert(id, Arc::new(Mutex::new(Transaction::new(id))));
        info!(target: TRANSACTION_TARGET, transaction = %id, "transaction opened");
        id
    }

    fn handle(&self, id: TransactionId) -> Result<Arc<Mutex<Transaction>>, TransactionError> {
        self.transactions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(TransactionError::UnknownTransaction { id })
    }

    /// Current state of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::UnknownTransaction`] for unknown ids.
    pub fn state(&self, id: TransactionId) -> Result<TransactionState, TransactionError> {
        let handle = self.handle(id)?;
        Ok(lock(&handle).state)
    }

    /// Paths snapshotted by `id`, in staging order.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::UnknownTransaction`] for unknown ids.
    pub fn staged_paths(&self, id: TransactionId) -> Result<Vec<PathBuf>, TransactionError> {
        let handle = self.handle(id)?;
        Ok(lock(&handle).snapshots.keys().cloned().collect())
    }

    /// Applied operations as `(path, kind)` pairs, in completion order.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::UnknownTransaction`] for unknown ids.
    pub fn operation_log(
        &self,
        id: TransactionId,
    ) -> Result<Vec<(PathBuf, &'static str)>, TransactionError> {
        let handle = self.handle(id)?;
        Ok(lock(&handle)
            .log
            .iter()
            .map(|entry| (entry.path.clone(), entry.kind))
            .collect())
    }

    /// Snapshots `path` unless the transaction already holds one for it.
    ///
    /// # Errors
    ///
    /// Fails for unknown or terminal transactions and when the file cannot
    /// be read.
    pub fn stage(&self, id: TransactionId, path: &Path) -> Result<(), TransactionError> {
        let handle = self.handle(id)?;
        {
            let transaction = lock(&handle);
            transaction.ensure_open()?;
            if transaction.snapshots.contains_key(path) {
                return Ok(());
            }
        }

        // Read outside the lock so other paths can stage concurrently.
        let snapshot = FileSnapshot::capture(path)?;
        let created = if snapshot.existed() {
            Vec::new()
        } else {
            atomic::missing_ancestors(path)
        };

        let mut transaction = lock(&handle);
        transaction.ensure_open()?;
        if !transaction.snapshots.contains_key(path) {
            debug!(
                target: TRANSACTION_TARGET,
                transaction = %id,
                path = %path.display(),
                existed = snapshot.existed(),
                "staged file"
            );
            transaction.snapshots.insert(path.to_path_buf(), snapshot);
            transaction.created_dirs.extend(created);
        }
        Ok(())
    }

    /// Stages and performs `operation`.
    ///
    /// # Errors
    ///
    /// Fails for unknown or terminal transactions, on I/O errors, and when a
    /// diff does not apply. A failed operation leaves its file untouched.
    pub fn apply(
        &self,
        id: TransactionId,
        operation: &Operation,
    ) -> Result<AppliedChange, TransactionError> {
        self.stage(id, &operation.path)?;
        let handle = self.handle(id)?;
        {
            let mut transaction = lock(&handle);
            transaction.ensure_open()?;
            transaction.state = TransactionState::Applying;
        }

        let change = self.perform(operation)?;

        let mut transaction = lock(&handle);
        transaction.log.push(LoggedOperation {
            path: operation.path.clone(),
            kind: operation.kind_name(),
        });
        debug!(
            target: TRANSACTION_TARGET,
            transaction = %id,
            path = %operation.path.display(),
            operation = operation.kind_name(),
            "operation applied"
        );
        Ok(change)
    }

    fn perform(&self, operation: &Operation) -> Result<AppliedChange, TransactionError> {
        let path = operation.path.as_path();
        let before = read_optional(path)?;
        let after = match &operation.kind {
            OperationKind::Write(bytes) => {
                atomic::write_atomic(path, bytes)
                    .map_err(|error| TransactionError::io(path, "write", error))?;
                Some(bytes.clone())
            }
            OperationKind::ApplyDiff(diff) => {
                let original = match before.as_deref() {
                    Some(bytes) => std::str::from_utf8(bytes).map_err(|_| {
                        TransactionError::NotText {
                            path: path.to_path_buf(),
                        }
                    })?,
                    None => "",
                };
                let patched = self
                    .diff
                    .apply(original, diff)
                    .map_err(|source| TransactionError::Diff {
                        path: path.to_path_buf(),
                        source,
                    })?;
                atomic::write_atomic(path, patched.as_bytes())
                    .map_err(|error| TransactionError::io(path, "write", error))?;
                Some(patched.into_bytes())
            }
            OperationKind::Delete => {
                atomic::remove(path).map_err(|error| TransactionError::io(path, "delete", error))?;
                None
            }
        };
        Ok(AppliedChange {
            path: path.to_path_buf(),
            before,
            after,
        })
    }

    /// Keeps every change and discards the snapshots.
    ///
    /// Committing an already committed transaction is a no-op.
    ///
    /// # Errors
    ///
    /// Fails for unknown or rolled-back transactions.
    pub fn commit(&self, id: TransactionId) -> Result<(), TransactionError> {
        let handle = self.handle(id)?;
        let mut transaction = lock(&handle);
        match transaction.state {
            TransactionState::Committed => return Ok(()),
            TransactionState::RolledBack => {
                return Err(TransactionError::Terminal {
                    id,
                    state: TransactionState::RolledBack,
                });
            }
            TransactionState::Pending | TransactionState::Applying => {}
        }
        transaction.state = TransactionState::Committed;
        transaction.snapshots.clear();
        transaction.created_dirs.clear();
        info!(
            target: TRANSACTION_TARGET,
            transaction = %id,
            operations = transaction.log.len(),
            "transaction committed"
        );
        Ok(())
    }

    /// Restores every staged path in reverse staging order.
    ///
    /// Restoration continues past individual failures. Rolling back an
    /// already rolled-back transaction is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::Integrity`] naming every path that could
    /// not be restored, and fails for unknown or committed transactions.
    pub fn rollback(&self, id: TransactionId) -> Result<(), TransactionError> {
        let handle = self.handle(id)?;
        let mut transaction = lock(&handle);
        match transaction.state {
            TransactionState::RolledBack => return Ok(()),
            TransactionState::Committed => {
                return Err(TransactionError::Terminal {
                    id,
                    state: TransactionState::Committed,
                });
            }
            TransactionState::Pending | TransactionState::Applying => {}
        }

        let mut failed = Vec::new();
        for snapshot in transaction.snapshots.values().rev() {
            if let Err(error) = restore(snapshot) {
                warn!(
                    target: TRANSACTION_TARGET,
                    transaction = %id,
                    path = %snapshot.path().display(),
                    %error,
                    "failed to restore file"
                );
                failed.push(snapshot.path().to_path_buf());
            }
        }
        let mut created = std::mem::take(&mut transaction.created_dirs);
        created.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
        created.dedup();
        for dir in &created {
            // Only empty directories go; anything else is left in place.
            if fs::remove_dir(dir).is_err() {
                debug!(target: TRANSACTION_TARGET, dir = %dir.display(), "kept created directory");
            }
        }

        transaction.state = TransactionState::RolledBack;
        transaction.snapshots.clear();
        if failed.is_empty() {
            info!(target: TRANSACTION_TARGET, transaction = %id, "transaction rolled back");
            Ok(())
        } else {
            Err(TransactionError::Integrity { id, paths: failed })
        }
    }

    /// Forgets a terminal transaction.
    ///
    /// Open transactions are kept; they must be committed or rolled back
    /// first.
    pub fn release(&self, id: TransactionId) {
        self.transactions.remove_if(&id, |_, handle| lock(handle).state.is_terminal());
    }

    /// Rolls back every open transaction, for shutdown.
    ///
    /// Returns the ids whose rollback reported an error.
    pub fn abort_all(&self) -> Vec<TransactionId> {
        let ids: Vec<TransactionId> = self.transactions.iter().map(|entry| *entry.key()).collect();
        let mut failed = Vec::new();
        for id in ids {
            let open = matches!(self.state(id), Ok(state) if !state.is_terminal());
            if open && self.rollback(id).is_err() {
                failed.push(id);
            }
        }
        failed
    }
}

fn lock(handle: &Mutex<Transaction>) -> MutexGuard<'_, Transaction> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, TransactionError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(TransactionError::io(path, "read", error)),
    }
}

fn restore(snapshot: &FileSnapshot) -> std::io::Result<()> {
    if snapshot.existed() {
        return atomic::write_atomic(snapshot.path(), snapshot.bytes());
    }
    match atomic::remove(snapshot.path()) {
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
