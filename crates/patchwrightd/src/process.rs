//! Foreground daemon entry point: configuration, telemetry, request loop.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use patchwright_config::Config;
use thiserror::Error;
use tracing::info;

use crate::dispatch::{self, DispatchError};
use crate::registry::{ToolError, ToolRegistry};
use crate::telemetry::{self, TelemetryError};

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Config {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// The working directory is unavailable.
    #[error("failed to determine the workspace root: {0}")]
    WorkspaceRoot(#[source] io::Error),
    /// The registry rejected the configuration or workspace.
    #[error("failed to start the tool registry: {0}")]
    Registry(#[from] ToolError),
    /// The request loop failed on its streams.
    #[error("request loop failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Loads configuration and serves JSONL requests on stdin until it closes.
///
/// The workspace root is the current directory. The registry is shut down
/// before returning, rolling back anything left open.
///
/// # Errors
///
/// See [`LaunchError`].
pub fn run_daemon() -> Result<(), LaunchError> {
    let config = Config::load().map_err(|source| LaunchError::Config { source })?;
    run_with(config, std::env::current_dir().map_err(LaunchError::WorkspaceRoot)?)
}

/// Serves stdin with an already loaded configuration rooted at `root`.
///
/// # Errors
///
/// See [`LaunchError`].
pub fn run_with(config: Config, root: PathBuf) -> Result<(), LaunchError> {
    telemetry::initialise(&config)?;
    let registry = ToolRegistry::new(config, root)?;
    let result = dispatch::serve(&registry, io::stdin().lock(), io::stdout().lock());
    registry.shutdown();
    let answered = result?;
    info!(target: PROCESS_TARGET, answered, "daemon exiting");
    Ok(())
}
