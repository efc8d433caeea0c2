use crate::modes::{LogFormat, PermissionDefault};

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default number of file operations allowed in flight within one batch.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default number of unchanged lines shown around each change in a hunk.
pub const DEFAULT_DIFF_CONTEXT_LINES: usize = 3;

/// Default token bucket capacity per principal and tool.
pub const DEFAULT_RATE_CAPACITY: u32 = 10;

/// Default number of tokens restored per second.
pub const DEFAULT_RATE_REFILL_PER_SECOND: u32 = 1;

/// Default upper bound on how long a caller waits for a rate token.
pub const DEFAULT_RATE_WAIT_MS: u64 = 0;

/// Default lifetime of a pending approval before it expires.
pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 300;

/// Default CPU-time ceiling for sandboxed commands.
pub const DEFAULT_SANDBOX_CPU_SECONDS: u64 = 30;

/// Default address-space ceiling for sandboxed commands (1 GiB).
pub const DEFAULT_SANDBOX_MEMORY_BYTES: u64 = 1 << 30;

/// Default wall-clock timeout for sandboxed commands.
pub const DEFAULT_SANDBOX_WALL_TIMEOUT_MS: u64 = 30_000;

/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_SANDBOX_GRACE_MS: u64 = 2_000;

/// Default cap on captured stdout and stderr bytes (1 MiB each).
pub const DEFAULT_SANDBOX_MAX_OUTPUT_BYTES: usize = 1 << 20;

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Workspace-relative ignore file consulted by the file tools.
pub const DEFAULT_IGNORE_FILE: &str = ".patchwrightignore";

/// Owned ignore file name for the configuration derive.
#[must_use]
pub fn default_ignore_file_string() -> String {
    DEFAULT_IGNORE_FILE.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default permission decision for invocations no rule matches.
#[must_use]
pub fn default_permission() -> PermissionDefault {
    PermissionDefault::Allow
}
