//! Shared configuration for the Patchwright edit engine.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults are
//! overridden by an optional configuration file (`--config-path` or
//! `PATCHWRIGHT_CONFIG_PATH`), then by `PATCHWRIGHT_*` environment variables,
//! and finally by command-line flags. Every key has a default, so an empty
//! environment always produces a usable [`Config`].

mod defaults;
mod modes;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_APPROVAL_TIMEOUT_SECS, DEFAULT_DIFF_CONTEXT_LINES, DEFAULT_IGNORE_FILE,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_CONCURRENCY, DEFAULT_RATE_CAPACITY,
    DEFAULT_RATE_REFILL_PER_SECOND, DEFAULT_RATE_WAIT_MS, DEFAULT_SANDBOX_CPU_SECONDS,
    DEFAULT_SANDBOX_GRACE_MS, DEFAULT_SANDBOX_MAX_OUTPUT_BYTES, DEFAULT_SANDBOX_MEMORY_BYTES,
    DEFAULT_SANDBOX_WALL_TIMEOUT_MS, default_ignore_file_string, default_log_filter,
    default_log_filter_string, default_log_format, default_permission,
};
pub use modes::{LogFormat, ModeParseError, PermissionDefault};

/// Resolved engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PATCHWRIGHT")]
pub struct Config {
    /// Tracing filter expression, e.g. `info` or `patchwrightd=debug`.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Maximum file operations executing at once within one batch.
    #[ortho_config(default = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,
    /// Unchanged lines kept on each side of a change in generated diffs.
    #[ortho_config(default = DEFAULT_DIFF_CONTEXT_LINES)]
    pub diff_context_lines: usize,
    /// Largest unchanged gap that still merges two changes into one hunk.
    ///
    /// Defaults to twice [`Config::diff_context_lines`] when unset.
    pub diff_merge_gap: Option<usize>,
    /// Count externally visible line numbers from zero instead of one.
    #[ortho_config(default = false)]
    pub zero_based_lines: bool,
    /// Token bucket capacity per principal and tool.
    #[ortho_config(default = DEFAULT_RATE_CAPACITY)]
    pub rate_capacity: u32,
    /// Tokens restored to each bucket per second.
    #[ortho_config(default = DEFAULT_RATE_REFILL_PER_SECOND)]
    pub rate_refill_per_second: u32,
    /// How long an invocation may wait for a rate token; zero fails at once.
    #[ortho_config(default = DEFAULT_RATE_WAIT_MS)]
    pub rate_wait_ms: u64,
    /// Seconds a pending approval survives before it expires.
    #[ortho_config(default = DEFAULT_APPROVAL_TIMEOUT_SECS)]
    pub approval_timeout_secs: u64,
    /// Decision applied when no permission rule matches.
    #[ortho_config(default = default_permission())]
    pub default_permission: PermissionDefault,
    /// CPU-time ceiling for sandboxed commands.
    #[ortho_config(default = DEFAULT_SANDBOX_CPU_SECONDS)]
    pub sandbox_cpu_seconds: u64,
    /// Address-space ceiling for sandboxed commands.
    #[ortho_config(default = DEFAULT_SANDBOX_MEMORY_BYTES)]
    pub sandbox_memory_bytes: u64,
    /// Wall-clock timeout for sandboxed commands.
    #[ortho_config(default = DEFAULT_SANDBOX_WALL_TIMEOUT_MS)]
    pub sandbox_wall_timeout_ms: u64,
    /// Grace period between the polite and forced termination signals.
    #[ortho_config(default = DEFAULT_SANDBOX_GRACE_MS)]
    pub sandbox_grace_ms: u64,
    /// Cap on captured bytes per output stream.
    #[ortho_config(default = DEFAULT_SANDBOX_MAX_OUTPUT_BYTES)]
    pub sandbox_max_output_bytes: usize,
    /// Keep root privileges for sandboxed commands instead of dropping to
    /// an unprivileged user.
    #[ortho_config(default = false)]
    pub sandbox_keep_privileges: bool,
    /// Let `ExecuteCommand` run well-known destructive programs.
    #[ortho_config(default = false)]
    pub allow_dangerous_commands: bool,
    /// Accept `set_rules` admin requests that replace the permission table.
    #[ortho_config(default = false)]
    pub allow_rule_updates: bool,
    /// Workspace-relative file listing paths the tools must not touch.
    #[ortho_config(default = default_ignore_file_string())]
    pub ignore_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            diff_context_lines: DEFAULT_DIFF_CONTEXT_LINES,
            diff_merge_gap: None,
            zero_based_lines: false,
            rate_capacity: DEFAULT_RATE_CAPACITY,
            rate_refill_per_second: DEFAULT_RATE_REFILL_PER_SECOND,
            rate_wait_ms: DEFAULT_RATE_WAIT_MS,
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            default_permission: default_permission(),
            sandbox_cpu_seconds: DEFAULT_SANDBOX_CPU_SECONDS,
            sandbox_memory_bytes: DEFAULT_SANDBOX_MEMORY_BYTES,
            sandbox_wall_timeout_ms: DEFAULT_SANDBOX_WALL_TIMEOUT_MS,
            sandbox_grace_ms: DEFAULT_SANDBOX_GRACE_MS,
            sandbox_max_output_bytes: DEFAULT_SANDBOX_MAX_OUTPUT_BYTES,
            sandbox_keep_privileges: false,
            allow_dangerous_commands: false,
            allow_rule_updates: false,
            ignore_file: default_ignore_file_string(),
        }
    }
}

impl Config {
    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Structured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Whether externally visible line numbers start at one.
    #[must_use]
    pub const fn one_based_lines(&self) -> bool {
        !self.zero_based_lines
    }

    /// Whether sandboxed commands drop root privileges.
    #[must_use]
    pub const fn drop_privileges(&self) -> bool {
        !self.sandbox_keep_privileges
    }

    /// Whether `ExecuteCommand` refuses destructive programs.
    #[must_use]
    pub const fn block_dangerous_commands(&self) -> bool {
        !self.allow_dangerous_commands
    }

    /// Largest unchanged gap merged into a single hunk.
    #[must_use]
    pub fn merge_gap(&self) -> usize {
        self.diff_merge_gap
            .unwrap_or_else(|| self.diff_context_lines.saturating_mul(2))
    }

    /// Maximum time an invocation waits for a rate token.
    #[must_use]
    pub const fn rate_wait(&self) -> Duration {
        Duration::from_millis(self.rate_wait_ms)
    }

    /// Lifetime of a pending approval.
    #[must_use]
    pub const fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    /// Rejects values the engine cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValidationError`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_concurrency == 0 {
            return Err(ConfigValidationError::new(
                "max_concurrency",
                "must allow at least one operation in flight",
            ));
        }
        if self.rate_capacity == 0 {
            return Err(ConfigValidationError::new(
                "rate_capacity",
                "bucket capacity must be at least one token",
            ));
        }
        if self.sandbox_wall_timeout_ms == 0 {
            return Err(ConfigValidationError::new(
                "sandbox_wall_timeout_ms",
                "timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// A configuration value outside the range the engine accepts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration for {key}: {reason}")]
pub struct ConfigValidationError {
    key: &'static str,
    reason: &'static str,
}

impl ConfigValidationError {
    const fn new(key: &'static str, reason: &'static str) -> Self {
        Self { key, reason }
    }

    /// Name of the offending configuration key.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        self.key
    }
}
