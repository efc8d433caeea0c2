//! Spawning and supervising sandboxed processes.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::capture::{CapturedStream, StreamReader, spawn_reader};
use crate::command::SandboxCommand;
use crate::error::SandboxError;
use crate::limits::ChildLimits;
use crate::policy::{EnvironmentPolicy, SandboxPolicy};
use crate::report::{ExecutionReport, Termination};

const SANDBOX_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::executor");
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs commands under a fixed [`SandboxPolicy`].
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    policy: SandboxPolicy,
}

impl Sandbox {
    /// Creates a sandbox that applies `policy` to every command.
    #[must_use]
    pub const fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy applied to launched commands.
    #[must_use]
    pub const fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Runs `command` to completion or until the wall timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] when the program cannot be launched or
    /// supervised. A program that fails or times out still yields a report.
    pub fn run(&self, command: &SandboxCommand) -> Result<ExecutionReport, SandboxError> {
        self.run_with_cancel(command, &CancellationToken::new())
    }

    /// Runs `command`, terminating it early once `cancel` is triggered.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] when the program cannot be launched or
    /// supervised.
    pub fn run_with_cancel(
        &self,
        command: &SandboxCommand,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, SandboxError> {
        if command.program().is_empty() {
            return Err(SandboxError::EmptyProgram);
        }
        let program = command.program().to_string_lossy().into_owned();
        let mut process = self.build(command);

        let started = Instant::now();
        let mut child = process.spawn().map_err(|source| SandboxError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(target: SANDBOX_TARGET, pid, program = %program, "sandboxed process started");

        let limit = self.policy.max_output_bytes();
        let stdout = child.stdout.take().map(|stream| spawn_reader(stream, limit));
        let stderr = child.stderr.take().map(|stream| spawn_reader(stream, limit));

        let supervised = self.supervise(&mut child, started, cancel);
        // Descendants that outlive the leader would keep the pipes open.
        reap_group(pid);
        let (status, termination) = supervised?;
        let duration = started.elapsed();

        // Pipes held open by an escaped descendant must not stall the caller.
        let drain_deadline = Instant::now() + self.policy.grace_period();
        let finish = |reader: Option<StreamReader>| {
            reader.map_or_else(CapturedStream::default, |reader| reader.finish(drain_deadline))
        };
        let (stdout, stdout_truncated) = finish(stdout).into_text();
        let (stderr, stderr_truncated) = finish(stderr).into_text();

        let report = ExecutionReport {
            termination,
            exit_code: status.code(),
            signal: status.signal(),
            stdout,
            stderr,
            duration,
            truncated: stdout_truncated || stderr_truncated,
        };
        info!(
            target: SANDBOX_TARGET,
            pid,
            program = %program,
            termination = ?report.termination,
            exit_code = ?report.exit_code,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            truncated = report.truncated,
            "sandboxed process finished"
        );
        Ok(report)
    }

    fn build(&self, command: &SandboxCommand) -> Command {
        let mut process = Command::new(command.program());
        process
            .args(command.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        if let Some(cwd) = command.cwd() {
            process.current_dir(cwd);
        }
        apply_environment(&mut process, self.policy.environment());
        process.envs(command.envs().iter().map(|(key, value)| (key, value)));
        ChildLimits::from_policy(&self.policy).install(&mut process);
        process
    }

    fn supervise(
        &self,
        child: &mut Child,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<(ExitStatus, Termination), SandboxError> {
        let pid = child.id();
        let deadline = started + self.policy.wall_timeout();
        loop {
            if let Some(status) = try_wait(child)? {
                let termination = if status.code().is_some() {
                    Termination::Exited
                } else {
                    Termination::Signalled
                };
                return Ok((status, termination));
            }
            if cancel.is_cancelled() {
                info!(target: SANDBOX_TARGET, pid, "cancelling sandboxed process");
                let status = self.terminate(child)?;
                return Ok((status, Termination::Cancelled));
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    target: SANDBOX_TARGET,
                    pid,
                    timeout_ms = u64::try_from(self.policy.wall_timeout().as_millis())
                        .unwrap_or(u64::MAX),
                    "sandboxed process exceeded its wall-clock timeout"
                );
                let status = self.terminate(child)?;
                return Ok((status, Termination::TimedOut));
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Sends `SIGTERM` to the group, waits out the grace period, then
    /// escalates to `SIGKILL`.
    fn terminate(&self, child: &mut Child) -> Result<ExitStatus, SandboxError> {
        let pid = child.id();
        signal_group(pid, Signal::SIGTERM)?;
        let grace_deadline = Instant::now() + self.policy.grace_period();
        while Instant::now() < grace_deadline {
            if let Some(status) = try_wait(child)? {
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
        debug!(target: SANDBOX_TARGET, pid, "grace period elapsed, killing process group");
        signal_group(pid, Signal::SIGKILL)?;
        child
            .wait()
            .map_err(|source| SandboxError::Wait { pid, source })
    }
}

fn apply_environment(process: &mut Command, policy: &EnvironmentPolicy) {
    match policy {
        EnvironmentPolicy::InheritAll => {}
        EnvironmentPolicy::Isolated => {
            process.env_clear();
        }
        EnvironmentPolicy::AllowList(keys) => {
            process.env_clear();
            for key in keys {
                if let Some(value) = std::env::var_os(key) {
                    process.env(key, value);
                }
            }
        }
    }
}

fn try_wait(child: &mut Child) -> Result<Option<ExitStatus>, SandboxError> {
    let pid = child.id();
    child
        .try_wait()
        .map_err(|source| SandboxError::Wait { pid, source })
}

fn signal_group(pid: u32, signal: Signal) -> Result<(), SandboxError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(());
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(SandboxError::Signal { pid, source }),
    }
}

fn reap_group(pid: u32) {
    if let Err(error) = signal_group(pid, Signal::SIGKILL) {
        debug!(target: SANDBOX_TARGET, pid, %error, "failed to clear process group");
    }
}
