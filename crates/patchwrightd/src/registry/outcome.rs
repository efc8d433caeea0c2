//! Successful tool results.

use patchwright_sandbox::ExecutionReport;
use serde::Serialize;

use crate::admission::PendingApproval;

/// Content of one file before and after a tool changed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    /// Workspace-relative path.
    pub path: String,
    /// Content before the change; empty for newly created files.
    pub old_content: String,
    /// Content after the change.
    pub new_content: String,
}

impl FileChange {
    pub(crate) fn from_bytes(path: String, before: Option<&[u8]>, after: Option<&[u8]>) -> Self {
        Self {
            path,
            old_content: lossy(before),
            new_content: lossy(after),
        }
    }
}

fn lossy(bytes: Option<&[u8]>) -> String {
    bytes
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default()
}

/// Result of a committed multi-file batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// Committed transaction, rendered as `tx-N`.
    pub transaction: String,
    /// One entry per operation, in submission order.
    pub changes: Vec<FileChange>,
}

/// Tool-specific payload of a completed invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tool", content = "result", rename_all = "snake_case")]
pub enum ToolOutput {
    /// The edited file.
    EditFile(FileChange),
    /// Every file the batch changed.
    MultiApplyDiff(BatchResult),
    /// Files whose content changed, ordered by path.
    SearchAndReplace(Vec<FileChange>),
    /// The written file.
    WriteFile(FileChange),
    /// How the command ended and what it printed.
    ExecuteCommand(ExecutionReport),
}

/// What dispatching an invocation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    /// The tool ran.
    Completed {
        /// Tool output.
        output: ToolOutput,
    },
    /// A permission rule parked the invocation until a reviewer decides.
    AwaitingApproval {
        /// Handle for resolving the approval.
        approval: PendingApproval,
    },
}

impl ToolOutcome {
    /// Output of a completed invocation.
    #[must_use]
    pub const fn output(&self) -> Option<&ToolOutput> {
        match self {
            Self::Completed { output } => Some(output),
            Self::AwaitingApproval { .. } => None,
        }
    }
}
