//! Per-tool preparation and execution.
//!
//! Every tool is split in two: `prepare` validates arguments and computes
//! everything it can without writing, and `execute` performs the effects.
//! The registry runs admission control between the two, so nothing touches
//! the workspace for an invocation that is refused.

mod edit_file;
mod execute_command;
mod line_ending;
mod multi_apply_diff;
mod search_and_replace;
mod write_file;

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::warn;

use super::{
    FileChange, RollbackStatus, ToolCall, ToolError, ToolInvocation, ToolOutput, ToolRegistry,
};
use crate::transaction::{Operation, TransactionError, TransactionId};

const TOOLS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::tools");

/// A validated invocation ready to run.
#[derive(Debug)]
pub(super) enum Plan {
    EditFile(edit_file::Plan),
    MultiApplyDiff(multi_apply_diff::Plan),
    SearchAndReplace(search_and_replace::Plan),
    WriteFile(write_file::Plan),
    ExecuteCommand(execute_command::Plan),
}

pub(super) fn prepare(
    registry: &ToolRegistry,
    invocation: &ToolInvocation,
) -> Result<Plan, ToolError> {
    Ok(match &invocation.call {
        ToolCall::EditFile(args) => Plan::EditFile(edit_file::prepare(registry, args)?),
        ToolCall::MultiApplyDiff(args) => {
            Plan::MultiApplyDiff(multi_apply_diff::prepare(registry, args)?)
        }
        ToolCall::SearchAndReplace(args) => {
            Plan::SearchAndReplace(search_and_replace::prepare(registry, args)?)
        }
        ToolCall::WriteFile(args) => Plan::WriteFile(write_file::prepare(registry, args)?),
        ToolCall::ExecuteCommand(args) => {
            Plan::ExecuteCommand(execute_command::prepare(
                registry,
                &invocation.principal,
                args,
            )?)
        }
    })
}

pub(super) fn execute(registry: &ToolRegistry, plan: Plan) -> Result<ToolOutput, ToolError> {
    match plan {
        Plan::EditFile(plan) => edit_file::execute(registry, plan),
        Plan::MultiApplyDiff(plan) => multi_apply_diff::execute(registry, &plan),
        Plan::SearchAndReplace(plan) => search_and_replace::execute(registry, &plan),
        Plan::WriteFile(plan) => write_file::execute(registry, plan),
        Plan::ExecuteCommand(plan) => execute_command::execute(registry, &plan),
    }
}

/// One operation of a batch, labelled with the caller's path.
#[derive(Debug)]
struct Staged {
    label: String,
    operation: Operation,
}

#[derive(Debug)]
struct Committed {
    transaction: TransactionId,
    changes: Vec<FileChange>,
}

/// The first failing operation of a batch after rollback.
#[derive(Debug)]
struct BatchFailure {
    label: String,
    error: TransactionError,
    rollback: RollbackStatus,
}

impl BatchFailure {
    fn into_batch_error(self) -> ToolError {
        ToolError::BatchFailed {
            failed_file: self.label,
            reason: self.error.reason(),
            rollback: self.rollback,
        }
    }

    /// Single-file tools surface the operation's own error when the rollback
    /// was clean.
    fn into_single_error(self) -> ToolError {
        match self.rollback {
            RollbackStatus::Restored => ToolError::Transaction(self.error),
            RollbackStatus::Diverged { .. } => self.into_batch_error(),
        }
    }
}

/// Runs `staged` in one transaction, committing on full success.
fn apply_batch(registry: &ToolRegistry, staged: &[Staged]) -> Result<Committed, BatchFailure> {
    let transactions = &registry.transactions;
    let id = transactions.begin();
    let report = registry.limiter.run(
        staged,
        |item| item.operation.path.as_path(),
        |item| transactions.apply(id, &item.operation),
    );
    let outcomes = report.into_outcomes();

    let failed_at = outcomes
        .iter()
        .position(|outcome| matches!(outcome, Some(Err(_))));
    if let Some(index) = failed_at {
        let error = outcomes
            .into_iter()
            .nth(index)
            .flatten()
            .and_then(Result::err);
        let rollback = roll_back(registry, id);
        transactions.release(id);
        let label = staged
            .get(index)
            .map(|item| item.label.clone())
            .unwrap_or_default();
        return Err(BatchFailure {
            label,
            error: error.unwrap_or(TransactionError::UnknownTransaction { id }),
            rollback,
        });
    }

    if let Err(error) = transactions.commit(id) {
        let rollback = roll_back(registry, id);
        transactions.release(id);
        return Err(BatchFailure {
            label: String::new(),
            error,
            rollback,
        });
    }
    transactions.release(id);

    let changes = outcomes
        .into_iter()
        .zip(staged)
        .filter_map(|(outcome, item)| match outcome {
            Some(Ok(change)) => Some(FileChange::from_bytes(
                item.label.clone(),
                change.before.as_deref(),
                change.after.as_deref(),
            )),
            _ => None,
        })
        .collect();
    Ok(Committed {
        transaction: id,
        changes,
    })
}

fn roll_back(registry: &ToolRegistry, id: TransactionId) -> RollbackStatus {
    match registry.transactions.rollback(id) {
        Ok(()) => RollbackStatus::Restored,
        Err(TransactionError::Integrity { paths, .. }) => {
            warn!(target: TOOLS_TARGET, transaction = %id, count = paths.len(), "rollback diverged");
            RollbackStatus::Diverged {
                paths: paths
                    .iter()
                    .map(|path| registry.workspace.relative(path))
                    .collect(),
            }
        }
        Err(error) => {
            warn!(target: TOOLS_TARGET, transaction = %id, %error, "rollback refused");
            RollbackStatus::Diverged { paths: Vec::new() }
        }
    }
}

/// Reads an existing UTF-8 file for a tool that edits text.
fn read_text(label: &str, path: &Path) -> Result<String, ToolError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(ToolError::validation(Some(label), "file does not exist"));
        }
        Err(source) => {
            return Err(ToolError::Io {
                path: label.to_owned(),
                action: "read",
                source,
            });
        }
    };
    String::from_utf8(bytes)
        .map_err(|_| ToolError::validation(Some(label), "file is not valid UTF-8 text"))
}
