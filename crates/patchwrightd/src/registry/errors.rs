//! Unified error type returned by tool dispatch.

use patchwright_config::ConfigValidationError;
use patchwright_sandbox::SandboxError;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::admission::AdmissionError;
use crate::diff::{ApplyError, ParseError};
use crate::transaction::TransactionError;

/// State of the workspace after a failed batch was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackStatus {
    /// Every touched file is byte-identical to its pre-batch state.
    Restored,
    /// Rollback could not restore these files.
    Diverged {
        /// Workspace-relative paths left inconsistent.
        paths: Vec<String>,
    },
}

/// Everything that can go wrong while dispatching a tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this name exists.
    #[error("unknown tool '{name}'")]
    UnknownTool {
        /// Name as supplied.
        name: String,
    },

    /// Arguments were rejected before anything was written.
    #[error("{}{reason}", .path.as_ref().map(|path| format!("{path}: ")).unwrap_or_default())]
    Validation {
        /// Workspace-relative path the problem concerns, if any.
        path: Option<String>,
        /// What was wrong.
        reason: String,
    },

    /// A supplied diff could not be parsed.
    #[error("{path}: {source}")]
    Parse {
        /// Workspace-relative target of the diff.
        path: String,
        /// Parser failure.
        #[source]
        source: ParseError,
    },

    /// One operation of a multi-file batch failed and the batch was rolled
    /// back.
    #[error("batch failed on {failed_file}: {reason}")]
    BatchFailed {
        /// Workspace-relative path of the first failing operation.
        failed_file: String,
        /// Why that operation failed.
        reason: String,
        /// Whether the rollback restored every file.
        rollback: RollbackStatus,
    },

    /// A single-file operation failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Permission, rate limiting, or approval refused the invocation.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// The command could not be launched.
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// The engine configuration is unusable.
    #[error(transparent)]
    Configuration(#[from] ConfigValidationError),

    /// Reading the workspace failed.
    #[error("failed to {action} {path}: {source}")]
    Io {
        /// Workspace-relative path.
        path: String,
        /// What was being attempted.
        action: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The registry is shutting down and accepts no new work.
    #[error("the tool registry is shutting down")]
    ShuttingDown,
}

impl ToolError {
    pub(crate) fn validation(path: Option<&str>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.map(str::to_owned),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable error category.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool { .. } => "unknown_tool",
            Self::Validation { .. } => "validation_error",
            Self::Parse { .. } => "parse_error",
            Self::BatchFailed { .. } => "batch_failed",
            Self::Transaction(error) => match error {
                TransactionError::Diff {
                    source: ApplyError::ContextMismatch { .. },
                    ..
                } => "context_mismatch",
                TransactionError::Diff { .. } | TransactionError::NotText { .. } => {
                    "validation_error"
                }
                TransactionError::Integrity { .. } => "integrity_error",
                TransactionError::Io { .. } => "io_error",
                TransactionError::UnknownTransaction { .. }
                | TransactionError::Terminal { .. }
                | TransactionError::Panicked(_) => "transaction_error",
            },
            Self::Admission(error) => match error {
                AdmissionError::RateLimited { .. } => "rate_limited",
                AdmissionError::PermissionDenied { .. } => "permission_denied",
                AdmissionError::UnknownApproval { .. } => "unknown_approval",
                AdmissionError::ApprovalExpired { .. } => "approval_expired",
            },
            Self::Sandbox(_) => "sandbox_error",
            Self::Configuration(_) => "configuration_error",
            Self::Io { .. } => "io_error",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// Structured fields a client can act on, beyond the message.
    #[must_use]
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Validation {
                path: Some(path), ..
            }
            | Self::Io { path, .. } => Some(json!({ "path": path })),
            Self::Parse { path, source } => Some(json!({
                "path": path,
                "position": source.position,
                "reason": source.reason,
            })),
            Self::BatchFailed {
                failed_file,
                reason,
                rollback,
            } => Some(json!({
                "failed_file": failed_file,
                "reason": reason,
                "rollback": rollback,
            })),
            Self::Transaction(TransactionError::Diff {
                source:
                    ApplyError::ContextMismatch {
                        hunk_index,
                        expected,
                        found,
                        line,
                    },
                ..
            }) => Some(json!({
                "hunk_index": hunk_index,
                "line": line,
                "expected": expected,
                "found": found,
            })),
            Self::Transaction(TransactionError::Integrity { paths, .. }) => Some(json!({
                "paths": paths.iter().map(|path| path.display().to_string()).collect::<Vec<_>>(),
            })),
            Self::Admission(AdmissionError::RateLimited { retry_after, .. }) => Some(json!({
                "retry_after_ms": u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            })),
            _ => None,
        }
    }

    /// Error envelope sent to clients.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            status: "error",
            kind: self.kind(),
            message: self.to_string(),
            details: self.details(),
        }
    }
}

/// JSON shape of a failed invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    /// Always `error`.
    pub status: &'static str,
    /// Value of [`ToolError::kind`].
    pub kind: &'static str,
    /// Human-readable description.
    pub message: String,
    /// Optional structured fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}
