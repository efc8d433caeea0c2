//! Resource-limited command execution for edit workflows.
//!
//! The `patchwright-sandbox` crate runs external programs as child processes
//! under a [`SandboxPolicy`]. The policy is applied between `fork` and `exec`,
//! so the limits are in force before the program's own code runs:
//!
//! - a CPU-time ceiling (`RLIMIT_CPU`) and an address-space ceiling
//!   (`RLIMIT_AS`);
//! - a privilege drop to an unprivileged user when the host runs as root;
//! - a fresh process group so termination reaches every descendant;
//! - an environment filtered through an allow-list.
//!
//! Output is captured incrementally into bounded buffers. Once the cap is
//! reached further bytes are drained and discarded, and the report is marked
//! as truncated. A wall-clock timeout and caller cancellation share a single
//! termination path: `SIGTERM` to the process group, a grace period, then
//! `SIGKILL`.
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use patchwright_sandbox::{Sandbox, SandboxCommand, SandboxPolicy, Termination};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = SandboxPolicy::new().with_wall_timeout(Duration::from_secs(2));
//! let command = SandboxCommand::new("echo").arg("hello from the sandbox");
//!
//! let report = Sandbox::new(policy).run(&command)?;
//! assert_eq!(report.termination, Termination::Exited);
//! assert_eq!(report.stdout, "hello from the sandbox\n");
//! # Ok(()) }
//! ```
//!
//! Every run produces an [`ExecutionReport`] with the same shape whether the
//! program succeeded, failed, timed out, or was cancelled. Only failures to
//! launch the program are reported as [`SandboxError`].

mod cancel;
mod capture;
mod command;
mod error;
mod executor;
mod limits;
mod policy;
mod report;

pub use cancel::CancellationToken;
pub use command::SandboxCommand;
pub use error::SandboxError;
pub use executor::Sandbox;
pub use policy::{EnvironmentPolicy, SandboxPolicy, UnprivilegedUser};
pub use report::{ExecutionReport, Termination};

#[cfg(test)]
mod tests;
