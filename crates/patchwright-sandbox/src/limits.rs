//! Restrictions applied inside the child between `fork` and `exec`.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Duration;

use nix::sys::resource::{Resource, setrlimit};
use nix::unistd::{Gid, Uid, geteuid, setgid, setuid};

use crate::policy::{SandboxPolicy, UnprivilegedUser};

/// Returns true when the current process runs with root privileges.
#[must_use]
pub(crate) fn is_elevated() -> bool {
    geteuid().is_root()
}

/// Pre-computed restrictions, copied into the `pre_exec` hook.
///
/// Everything is resolved in the parent so the hook only issues syscalls.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ChildLimits {
    cpu_seconds: Option<u64>,
    memory_bytes: Option<u64>,
    drop_to: Option<UnprivilegedUser>,
}

impl ChildLimits {
    pub(crate) fn from_policy(policy: &SandboxPolicy) -> Self {
        let drop_to = (policy.drop_privileges() && is_elevated())
            .then(|| policy.unprivileged_user());
        Self {
            cpu_seconds: policy.cpu_limit().map(whole_seconds),
            memory_bytes: policy.memory_limit(),
            drop_to,
        }
    }

    /// Installs the restrictions on `command`.
    pub(crate) fn install(self, command: &mut Command) {
        // SAFETY: the hook runs in the forked child and only calls
        // setrlimit, setgroups, setgid, and setuid, none of which allocate or
        // take locks.
        unsafe {
            command.pre_exec(move || self.apply_in_child());
        }
    }

    fn apply_in_child(self) -> io::Result<()> {
        if let Some(seconds) = self.cpu_seconds {
            // The soft limit raises SIGXCPU; the hard limit one second later
            // guarantees termination if the signal is ignored.
            setrlimit(Resource::RLIMIT_CPU, seconds, seconds.saturating_add(1))?;
        }
        if let Some(bytes) = self.memory_bytes {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(user) = self.drop_to {
            let gid = Gid::from_raw(user.gid);
            #[cfg(target_os = "linux")]
            nix::unistd::setgroups(&[gid])?;
            setgid(gid)?;
            setuid(Uid::from_raw(user.uid))?;
        }
        Ok(())
    }
}

fn whole_seconds(limit: Duration) -> u64 {
    let seconds = limit.as_secs();
    if limit.subsec_nanos() > 0 || seconds == 0 {
        seconds.saturating_add(1)
    } else {
        seconds
    }
}
