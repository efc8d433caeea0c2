//! Sandbox policy definition and builder helpers.

use std::collections::BTreeSet;
use std::time::Duration;

/// Environment variables inherited by default.
const DEFAULT_ALLOWED_ENVIRONMENT: [&str; 3] = ["PATH", "HOME", "LANG"];

/// Environment inheritance strategy applied to sandboxed processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentPolicy {
    /// Remove all environment variables before launching the child.
    Isolated,
    /// Allow only the named environment variables to be inherited.
    AllowList(BTreeSet<String>),
    /// Inherit the full environment unchanged.
    InheritAll,
}

impl Default for EnvironmentPolicy {
    fn default() -> Self {
        Self::AllowList(
            DEFAULT_ALLOWED_ENVIRONMENT
                .iter()
                .map(|key| (*key).to_owned())
                .collect(),
        )
    }
}

impl EnvironmentPolicy {
    pub(crate) fn with_allowed(self, key: String) -> Self {
        match self {
            Self::Isolated => Self::AllowList(BTreeSet::from([key])),
            Self::AllowList(mut keys) => {
                let _ = keys.insert(key);
                Self::AllowList(keys)
            }
            Self::InheritAll => Self::InheritAll,
        }
    }
}

/// Identity a root host switches to before running a command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnprivilegedUser {
    /// Numeric user id.
    pub uid: u32,
    /// Numeric group id.
    pub gid: u32,
}

impl Default for UnprivilegedUser {
    /// The conventional `nobody:nogroup` identity.
    fn default() -> Self {
        Self {
            uid: 65_534,
            gid: 65_534,
        }
    }
}

/// Resource ceilings and isolation settings for one command.
///
/// ```
/// use std::time::Duration;
///
/// use patchwright_sandbox::SandboxPolicy;
///
/// let policy = SandboxPolicy::new()
///     .with_wall_timeout(Duration::from_secs(2))
///     .with_max_output_bytes(4096)
///     .allow_environment_variable("RUST_LOG");
/// assert_eq!(policy.wall_timeout(), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    cpu_limit: Option<Duration>,
    memory_limit: Option<u64>,
    wall_timeout: Duration,
    grace_period: Duration,
    max_output_bytes: usize,
    drop_privileges: bool,
    unprivileged_user: UnprivilegedUser,
    environment: EnvironmentPolicy,
}

impl SandboxPolicy {
    /// Creates a policy with a 30 second CPU and wall budget, a 1 GiB
    /// address-space ceiling, 1 MiB of captured output per stream, and
    /// privilege dropping enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cpu_limit: Some(Duration::from_secs(30)),
            memory_limit: Some(1 << 30),
            wall_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(2),
            max_output_bytes: 1 << 20,
            drop_privileges: true,
            unprivileged_user: UnprivilegedUser::default(),
            environment: EnvironmentPolicy::default(),
        }
    }

    /// Sets the CPU-time ceiling; `None` leaves the inherited limit in place.
    #[must_use]
    pub fn with_cpu_limit(mut self, limit: Option<Duration>) -> Self {
        self.cpu_limit = limit;
        self
    }

    /// Sets the address-space ceiling in bytes.
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: Option<u64>) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Sets the wall-clock timeout.
    #[must_use]
    pub fn with_wall_timeout(mut self, timeout: Duration) -> Self {
        self.wall_timeout = timeout;
        self
    }

    /// Sets the delay between `SIGTERM` and `SIGKILL`.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Caps the bytes retained for each of stdout and stderr.
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Enables or disables the privilege drop applied when running as root.
    #[must_use]
    pub fn with_drop_privileges(mut self, drop: bool) -> Self {
        self.drop_privileges = drop;
        self
    }

    /// Overrides the identity used for the privilege drop.
    #[must_use]
    pub fn with_unprivileged_user(mut self, user: UnprivilegedUser) -> Self {
        self.unprivileged_user = user;
        self
    }

    /// Whitelists an environment variable for inheritance.
    ///
    /// When the policy is already [`EnvironmentPolicy::InheritAll`] this is a
    /// no-op.
    #[must_use]
    pub fn allow_environment_variable(mut self, key: impl Into<String>) -> Self {
        self.environment = self.environment.with_allowed(key.into());
        self
    }

    /// Replaces the environment policy.
    #[must_use]
    pub fn with_environment(mut self, environment: EnvironmentPolicy) -> Self {
        self.environment = environment;
        self
    }

    /// CPU-time ceiling, if any.
    #[must_use]
    pub const fn cpu_limit(&self) -> Option<Duration> {
        self.cpu_limit
    }

    /// Address-space ceiling in bytes, if any.
    #[must_use]
    pub const fn memory_limit(&self) -> Option<u64> {
        self.memory_limit
    }

    /// Wall-clock timeout.
    #[must_use]
    pub const fn wall_timeout(&self) -> Duration {
        self.wall_timeout
    }

    /// Delay between the polite and forced termination signals.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Captured byte cap per stream.
    #[must_use]
    pub const fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    /// Whether a root host drops to [`SandboxPolicy::unprivileged_user`].
    #[must_use]
    pub const fn drop_privileges(&self) -> bool {
        self.drop_privileges
    }

    /// Identity used for the privilege drop.
    #[must_use]
    pub const fn unprivileged_user(&self) -> UnprivilegedUser {
        self.unprivileged_user
    }

    /// Environment inheritance strategy.
    #[must_use]
    pub const fn environment(&self) -> &EnvironmentPolicy {
        &self.environment
    }
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::new()
    }
}
