use std::path::Path;
use std::time::Duration;

use patchwright_sandbox::{Sandbox, SandboxCommand, SandboxPolicy};
use tracing::info;

use super::TOOLS_TARGET;
use crate::admission::AdmissionError;
use crate::registry::{
    ExecuteCommandArgs, PolicyOverrides, ToolError, ToolName, ToolOutput, ToolRegistry,
};

/// Programs refused outright when blocking is enabled.
const DANGEROUS_PROGRAMS: &[&str] = &[
    "rm", "rmdir", "del", "format", "fdisk", "dd", "mkfs", "sudo", "su", "chmod", "chown", "kill",
    "killall", "pkill", "shutdown", "reboot", "halt", "poweroff", "init",
];

#[derive(Debug)]
pub(crate) struct Plan {
    command: SandboxCommand,
    policy: SandboxPolicy,
}

pub(super) fn prepare(
    registry: &ToolRegistry,
    principal: &str,
    args: &ExecuteCommandArgs,
) -> Result<Plan, ToolError> {
    let program = args.program.trim();
    if program.is_empty() {
        return Err(ToolError::validation(None, "program is empty"));
    }
    if registry.config.block_dangerous_commands() && is_dangerous(program) {
        return Err(AdmissionError::PermissionDenied {
            principal: principal.to_owned(),
            tool: ToolName::ExecuteCommand.as_str().to_owned(),
            reason: format!("program '{}' is blocked as potentially destructive", base_name(program)),
        }
        .into());
    }
    let cwd = match args.cwd.as_deref() {
        Some(dir) => {
            let resolved = registry.workspace.resolve(dir)?;
            if !resolved.is_dir() {
                return Err(ToolError::validation(Some(dir), "working directory does not exist"));
            }
            resolved
        }
        None => registry.workspace.root().to_path_buf(),
    };
    Ok(Plan {
        command: SandboxCommand::new(program)
            .args(&args.args)
            .current_dir(cwd),
        policy: tightened(registry.sandbox.clone(), args.policy),
    })
}

fn base_name(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(program)
}

fn is_dangerous(program: &str) -> bool {
    DANGEROUS_PROGRAMS.contains(&base_name(program))
}

/// Applies caller overrides that do not exceed the configured ceilings.
fn tightened(policy: SandboxPolicy, overrides: PolicyOverrides) -> SandboxPolicy {
    let cpu = match (policy.cpu_limit(), overrides.cpu_seconds) {
        (Some(limit), Some(seconds)) => Some(limit.min(Duration::from_secs(seconds))),
        (None, Some(seconds)) => Some(Duration::from_secs(seconds)),
        (limit, None) => limit,
    };
    let memory = match (policy.memory_limit(), overrides.memory_bytes) {
        (Some(limit), Some(bytes)) => Some(limit.min(bytes)),
        (None, Some(bytes)) => Some(bytes),
        (limit, None) => limit,
    };
    let wall = overrides
        .wall_timeout_ms
        .map_or(policy.wall_timeout(), |ms| {
            policy.wall_timeout().min(Duration::from_millis(ms))
        });
    let output = overrides
        .max_output_bytes
        .map_or(policy.max_output_bytes(), |bytes| {
            policy.max_output_bytes().min(bytes)
        });
    policy
        .with_cpu_limit(cpu)
        .with_memory_limit(memory)
        .with_wall_timeout(wall)
        .with_max_output_bytes(output)
}

pub(super) fn execute(registry: &ToolRegistry, plan: &Plan) -> Result<ToolOutput, ToolError> {
    let sandbox = Sandbox::new(plan.policy.clone());
    let report = sandbox.run_with_cancel(&plan.command, &registry.cancel)?;
    info!(
        target: TOOLS_TARGET,
        program = %plan.command.program().to_string_lossy(),
        termination = ?report.termination,
        exit_code = ?report.exit_code,
        truncated = report.truncated,
        "command finished"
    );
    Ok(ToolOutput::ExecuteCommand(report))
}
