//! Enumerated configuration values accepted from files, environment, and flags.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the daemon renders tracing events on stderr.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, fields flattened.
    #[default]
    Json,
    /// Single-line text for interactive use.
    Compact,
}

/// Decision applied when no permission rule matches an invocation.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PermissionDefault {
    /// Run the tool without further checks.
    #[default]
    Allow,
    /// Refuse the tool outright.
    Deny,
    /// Suspend the tool until an external actor approves it.
    RequireConfirmation,
}

/// Error returned when a mode name is not recognised.
pub type ModeParseError = strum::ParseError;
