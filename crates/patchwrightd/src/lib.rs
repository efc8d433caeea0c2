//! Transactional multi-file edit engine.
//!
//! `patchwrightd` applies edits proposed by automated agents to a workspace.
//! Edits arrive as tool invocations through the [`registry::ToolRegistry`],
//! which validates them, checks them against a permission table and a
//! per-principal rate limit, and runs them:
//!
//! - single-file edits and writes are applied atomically;
//! - multi-file diff batches run inside a [`transaction`] and either commit
//!   as a whole or roll every touched file back to its original bytes;
//! - commands run in the resource-limited sandbox from
//!   [`patchwright_sandbox`].
//!
//! The binary serves the registry over JSONL on stdin and stdout; see
//! [`dispatch`]. Configuration is layered through
//! [`patchwright_config::Config`].

pub mod admission;
pub mod concurrency;
pub mod diff;
pub mod dispatch;
pub mod line_index;
mod process;
pub mod registry;
pub mod telemetry;
pub mod transaction;

pub use process::{LaunchError, run_daemon, run_with};
pub use registry::{ToolError, ToolOutcome, ToolRegistry};

#[cfg(test)]
mod tests;
