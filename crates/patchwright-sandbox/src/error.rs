//! Domain errors raised by the sandbox executor.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised while launching or supervising a sandboxed process.
///
/// A program that starts and then fails, times out, or is cancelled is not an
/// error: those outcomes are described by an [`crate::ExecutionReport`].
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The command named no program.
    #[error("sandboxed commands require a program name")]
    EmptyProgram,

    /// The operating system refused to start the program.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        /// Program as supplied by the caller.
        program: String,
        /// Underlying launch failure, including errors raised before `exec`.
        #[source]
        source: io::Error,
    },

    /// Waiting on the child process failed.
    #[error("failed to wait for sandboxed process {pid}: {source}")]
    Wait {
        /// Process identifier of the child.
        pid: u32,
        /// Underlying wait failure.
        #[source]
        source: io::Error,
    },

    /// Delivering a termination signal to the process group failed.
    #[error("failed to signal process group {pid}: {source}")]
    Signal {
        /// Process group identifier (equal to the child pid).
        pid: u32,
        /// Underlying errno.
        #[source]
        source: Errno,
    },
}
