//! Tool names, argument schemas, and the invocation envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};

use super::ToolError;

/// The closed set of tools the registry dispatches.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    /// Replace an inclusive line range in one file.
    EditFile,
    /// Apply unified diffs to several files as one transaction.
    MultiApplyDiff,
    /// Regex or literal replacement across a file or directory.
    SearchAndReplace,
    /// Create or overwrite one file.
    WriteFile,
    /// Run a program inside the sandbox.
    ExecuteCommand,
}

impl ToolName {
    /// Resource class checked by permission rules.
    #[must_use]
    pub const fn resource_class(self) -> &'static str {
        match self {
            Self::ExecuteCommand => "process",
            Self::EditFile | Self::MultiApplyDiff | Self::SearchAndReplace | Self::WriteFile => {
                "filesystem"
            }
        }
    }

    /// Wire name of the tool.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Arguments of `edit_file`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditFileArgs {
    /// Workspace-relative target file.
    pub path: String,
    /// First replaced line, inclusive.
    pub start_line: i64,
    /// Last replaced line, inclusive.
    pub end_line: i64,
    /// Replacement text; empty deletes the range.
    pub new_content: String,
}

/// One file of a `multi_apply_diff` batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDiff {
    /// Workspace-relative target file.
    pub path: String,
    /// Unified diff text for that file.
    pub diff: String,
}

/// Arguments of `multi_apply_diff`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiApplyDiffArgs {
    /// Per-file diffs in application order.
    pub operations: Vec<FileDiff>,
}

/// Arguments of `search_and_replace`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchAndReplaceArgs {
    /// Workspace-relative file or directory.
    pub path: String,
    /// Text or regular expression to find.
    pub pattern: String,
    /// Treat `pattern` as a regular expression.
    #[serde(default)]
    pub is_regex: bool,
    /// Replacement; `$n` groups expand only in regex mode.
    pub replacement: String,
    /// Match without regard to ASCII and Unicode case.
    #[serde(default)]
    pub case_insensitive: bool,
    /// Replace every match rather than the first per file.
    #[serde(default = "replace_all_default")]
    pub replace_all: bool,
}

const fn replace_all_default() -> bool {
    true
}

/// Arguments of `write_file`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteFileArgs {
    /// Workspace-relative target file.
    pub path: String,
    /// Full new content.
    pub content: String,
    /// Allow replacing an existing file.
    #[serde(default)]
    pub overwrite: bool,
}

/// Per-invocation tightening of the configured sandbox limits.
///
/// Values above the configured ceilings are clamped down to them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverrides {
    /// CPU-time ceiling in seconds.
    pub cpu_seconds: Option<u64>,
    /// Address-space ceiling in bytes.
    pub memory_bytes: Option<u64>,
    /// Wall-clock timeout in milliseconds.
    pub wall_timeout_ms: Option<u64>,
    /// Captured bytes per stream.
    pub max_output_bytes: Option<usize>,
}

/// Arguments of `execute_command`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecuteCommandArgs {
    /// Program name or path.
    pub program: String,
    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Workspace-relative working directory; the root when absent.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Limits for this run.
    #[serde(default)]
    pub policy: PolicyOverrides,
}

/// Typed arguments of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    /// `edit_file`
    EditFile(EditFileArgs),
    /// `multi_apply_diff`
    MultiApplyDiff(MultiApplyDiffArgs),
    /// `search_and_replace`
    SearchAndReplace(SearchAndReplaceArgs),
    /// `write_file`
    WriteFile(WriteFileArgs),
    /// `execute_command`
    ExecuteCommand(ExecuteCommandArgs),
}

impl ToolCall {
    /// Decodes `arguments` for the tool called `tool`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::UnknownTool`] for names outside the closed set
    /// and [`ToolError::Validation`] when the arguments do not match the
    /// tool's schema.
    pub fn decode(tool: &str, arguments: Value) -> Result<Self, ToolError> {
        let name: ToolName = tool.parse().map_err(|_| ToolError::UnknownTool {
            name: tool.to_owned(),
        })?;
        let call = match name {
            ToolName::EditFile => Self::EditFile(arguments_for(name, arguments)?),
            ToolName::MultiApplyDiff => Self::MultiApplyDiff(arguments_for(name, arguments)?),
            ToolName::SearchAndReplace => Self::SearchAndReplace(arguments_for(name, arguments)?),
            ToolName::WriteFile => Self::WriteFile(arguments_for(name, arguments)?),
            ToolName::ExecuteCommand => Self::ExecuteCommand(arguments_for(name, arguments)?),
        };
        Ok(call)
    }

    /// Tool this call targets.
    #[must_use]
    pub const fn name(&self) -> ToolName {
        match self {
            Self::EditFile(_) => ToolName::EditFile,
            Self::MultiApplyDiff(_) => ToolName::MultiApplyDiff,
            Self::SearchAndReplace(_) => ToolName::SearchAndReplace,
            Self::WriteFile(_) => ToolName::WriteFile,
            Self::ExecuteCommand(_) => ToolName::ExecuteCommand,
        }
    }
}

fn arguments_for<T>(name: ToolName, arguments: Value) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(arguments).map_err(|error| {
        ToolError::validation(None, format!("invalid arguments for {name}: {error}"))
    })
}

/// A tool call together with the principal requesting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Identity checked by permissions and rate limits.
    pub principal: String,
    /// What to run.
    pub call: ToolCall,
}

impl ToolInvocation {
    /// Pairs `call` with `principal`.
    #[must_use]
    pub fn new(principal: impl Into<String>, call: ToolCall) -> Self {
        Self {
            principal: principal.into(),
            call,
        }
    }

    /// Decodes an invocation from its wire parts.
    ///
    /// # Errors
    ///
    /// See [`ToolCall::decode`].
    pub fn decode(
        principal: impl Into<String>,
        tool: &str,
        arguments: Value,
    ) -> Result<Self, ToolError> {
        Ok(Self::new(principal, ToolCall::decode(tool, arguments)?))
    }

    /// Tool this invocation targets.
    #[must_use]
    pub const fn tool(&self) -> ToolName {
        self.call.name()
    }
}
