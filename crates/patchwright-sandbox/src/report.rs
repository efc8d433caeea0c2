//! Structured outcome of a sandboxed run.

use std::time::Duration;

use serde::{Serialize, Serializer};

/// How a sandboxed process came to an end.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The process exited on its own with a status code.
    Exited,
    /// The process was killed by a signal it did not receive from the
    /// executor, such as `SIGXCPU` after exhausting its CPU budget.
    Signalled,
    /// The wall-clock timeout elapsed and the executor terminated the group.
    TimedOut,
    /// The caller cancelled the run and the executor terminated the group.
    Cancelled,
}

/// Result of a sandboxed run, identical in shape for every termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    /// How the process ended.
    pub termination: Termination,
    /// Exit status when the process exited normally.
    pub exit_code: Option<i32>,
    /// Signal that ended the process, when one did.
    pub signal: Option<i32>,
    /// Captured standard output, lossily decoded as UTF-8.
    pub stdout: String,
    /// Captured standard error, lossily decoded as UTF-8.
    pub stderr: String,
    /// Wall-clock time from spawn to reap.
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// True when either stream exceeded the capture cap.
    pub truncated: bool,
}

impl ExecutionReport {
    /// True when the process exited on its own with status zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == Some(0)
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}
