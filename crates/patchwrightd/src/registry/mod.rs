//! Uniform tool-invocation boundary.
//!
//! [`ToolRegistry`] owns every engine component and dispatches the closed set
//! of tools in [`ToolName`]. Each invocation is validated first, then checked
//! against the permission table, then charged a rate token, and only then
//! executed. File tools run inside a transaction that commits on full success
//! and rolls back as a unit otherwise; `execute_command` goes to the sandbox.
//!
//! Invocations a permission rule marks for confirmation are parked and
//! returned as [`ToolOutcome::AwaitingApproval`]. Resolving the approval
//! re-validates and runs the parked invocation.

mod errors;
mod invocation;
mod outcome;
mod tools;
mod workspace;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use patchwright_config::Config;
use patchwright_sandbox::{CancellationToken, SandboxPolicy};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use errors::{ErrorEnvelope, RollbackStatus, ToolError};
pub use invocation::{
    EditFileArgs, ExecuteCommandArgs, FileDiff, MultiApplyDiffArgs, PolicyOverrides,
    SearchAndReplaceArgs, ToolCall, ToolInvocation, ToolName, WriteFileArgs,
};
pub use outcome::{BatchResult, FileChange, ToolOutcome, ToolOutput};
pub use workspace::Workspace;

use crate::admission::{
    AdmissionError, ApprovalDecision, ApprovalId, ApprovalQueue, Decision, PendingApproval,
    PermissionGate, PermissionRequest, PermissionRule, RateLimiter, Resolution,
};
use crate::concurrency::ConcurrencyLimiter;
use crate::diff::DiffEngine;
use crate::line_index::LineIndexer;
use crate::transaction::TransactionManager;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// Entry point for every tool invocation against one workspace.
#[derive(Debug)]
pub struct ToolRegistry {
    config: Config,
    workspace: Workspace,
    diff: DiffEngine,
    lines: LineIndexer,
    transactions: TransactionManager,
    limiter: ConcurrencyLimiter,
    rate: RateLimiter,
    permissions: PermissionGate,
    approvals: ApprovalQueue<ToolInvocation>,
    sandbox: SandboxPolicy,
    cancel: CancellationToken,
    shutting_down: AtomicBool,
}

impl ToolRegistry {
    /// Builds every component from `config` for the workspace at `root`.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the root cannot be opened.
    pub fn new(config: Config, root: impl AsRef<Path>) -> Result<Self, ToolError> {
        config.validate()?;
        let workspace = Workspace::open(root, &config.ignore_file)?;
        let diff = DiffEngine::from_config(&config);
        let registry = Self {
            workspace,
            diff,
            lines: LineIndexer::new(config.one_based_lines()),
            transactions: TransactionManager::new(diff),
            limiter: ConcurrencyLimiter::new(config.max_concurrency),
            rate: RateLimiter::per_second(config.rate_capacity, config.rate_refill_per_second),
            permissions: PermissionGate::new(config.default_permission),
            approvals: ApprovalQueue::new(config.approval_timeout()),
            sandbox: sandbox_policy(&config),
            cancel: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            config,
        };
        info!(
            target: REGISTRY_TARGET,
            root = %registry.workspace.root().display(),
            max_concurrency = registry.limiter.max_in_flight(),
            "tool registry ready"
        );
        Ok(registry)
    }

    /// Configuration the registry was built from.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Workspace the registry confines paths to.
    #[must_use]
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Permission table consulted before every invocation.
    #[must_use]
    pub const fn permissions(&self) -> &PermissionGate {
        &self.permissions
    }

    /// Per-principal, per-tool token buckets.
    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.rate
    }

    /// Transactions opened by file tools.
    #[must_use]
    pub const fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    /// Decodes and dispatches one invocation from its wire parts.
    ///
    /// # Errors
    ///
    /// See [`ToolRegistry::dispatch`]; additionally fails with
    /// [`ToolError::UnknownTool`] or [`ToolError::Validation`] when the call
    /// cannot be decoded.
    pub fn invoke(
        &self,
        principal: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<ToolOutcome, ToolError> {
        self.dispatch(ToolInvocation::decode(principal, tool, arguments)?)
    }

    /// Runs `invocation` through validation, admission, and execution.
    ///
    /// # Errors
    ///
    /// Returns the first failure of any stage. Nothing is written unless
    /// validation and admission both pass.
    pub fn dispatch(&self, invocation: ToolInvocation) -> Result<ToolOutcome, ToolError> {
        self.ensure_running()?;
        let tool = invocation.tool();
        debug!(
            target: REGISTRY_TARGET,
            principal = %invocation.principal,
            tool = %tool,
            "dispatching invocation"
        );
        let plan = tools::prepare(self, &invocation)?;

        let request = PermissionRequest {
            principal: &invocation.principal,
            tool: tool.as_str(),
            resource_class: tool.resource_class(),
        };
        match self.permissions.evaluate(&request) {
            Decision::Allow => {}
            Decision::Deny => {
                return Err(AdmissionError::PermissionDenied {
                    principal: invocation.principal.clone(),
                    tool: tool.as_str().to_owned(),
                    reason: "denied by permission rule".to_owned(),
                }
                .into());
            }
            Decision::RequireConfirmation => {
                let principal = invocation.principal.clone();
                let approval = self.approvals.submit(&principal, tool.as_str(), invocation);
                return Ok(ToolOutcome::AwaitingApproval { approval });
            }
        }

        self.admit_and_run(&invocation, plan)
    }

    /// Applies a reviewer's decision to a parked invocation.
    ///
    /// An approved invocation is validated again against the current
    /// workspace, charged a rate token, and run.
    ///
    /// # Errors
    ///
    /// Fails with [`AdmissionError::UnknownApproval`] or
    /// [`AdmissionError::ApprovalExpired`] for stale handles,
    /// [`AdmissionError::PermissionDenied`] when the reviewer denies, and
    /// otherwise as [`ToolRegistry::dispatch`].
    pub fn resolve_approval(
        &self,
        id: ApprovalId,
        decision: ApprovalDecision,
    ) -> Result<ToolOutcome, ToolError> {
        self.ensure_running()?;
        match self.approvals.resolve(id, decision)? {
            Resolution::Approved(invocation) => {
                let plan = tools::prepare(self, &invocation)?;
                self.admit_and_run(&invocation, plan)
            }
            Resolution::Denied {
                principal,
                tool,
                reason,
            } => Err(AdmissionError::PermissionDenied {
                principal,
                tool,
                reason,
            }
            .into()),
        }
    }

    /// Invocations awaiting a decision.
    #[must_use]
    pub fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.approvals.list()
    }

    /// Drops a parked invocation without running it.
    pub fn cancel_approval(&self, id: ApprovalId) -> bool {
        self.approvals.cancel(id)
    }

    /// Replaces the permission table on behalf of an administrative request.
    ///
    /// Refused unless the configuration sets `allow_rule_updates`, so a
    /// client of the request stream cannot lift the rules it is bound by.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::PermissionDenied`] when rule updates are
    /// disabled.
    pub fn update_permission_rules(&self, rules: Vec<PermissionRule>) -> Result<usize, ToolError> {
        if !self.config.allow_rule_updates {
            warn!(target: REGISTRY_TARGET, "refused permission rule update");
            return Err(AdmissionError::PermissionDenied {
                principal: "admin".to_owned(),
                tool: "set_rules".to_owned(),
                reason: "permission rule updates are disabled".to_owned(),
            }
            .into());
        }
        let count = rules.len();
        self.permissions.replace_rules(rules);
        info!(target: REGISTRY_TARGET, count, "permission rules replaced");
        Ok(count)
    }

    fn admit_and_run(
        &self,
        invocation: &ToolInvocation,
        plan: tools::Plan,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = invocation.tool().as_str();
        let wait = self.config.rate_wait();
        if wait.is_zero() {
            self.rate.acquire(&invocation.principal, tool)?;
        } else {
            self.rate.acquire_within(&invocation.principal, tool, wait)?;
        }

        match tools::execute(self, plan) {
            Ok(output) => {
                info!(
                    target: REGISTRY_TARGET,
                    principal = %invocation.principal,
                    tool,
                    "invocation completed"
                );
                Ok(ToolOutcome::Completed { output })
            }
            Err(error) => {
                warn!(
                    target: REGISTRY_TARGET,
                    principal = %invocation.principal,
                    tool,
                    kind = error.kind(),
                    %error,
                    "invocation failed"
                );
                Err(error)
            }
        }
    }

    fn ensure_running(&self) -> Result<(), ToolError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ToolError::ShuttingDown);
        }
        Ok(())
    }

    /// Stops accepting work and releases held resources.
    ///
    /// Running commands are cancelled, open transactions rolled back, parked
    /// approvals dropped, and rate buckets cleared. Calling it again is a
    /// no-op.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let failed = self.transactions.abort_all();
        if !failed.is_empty() {
            warn!(
                target: REGISTRY_TARGET,
                transactions = failed.len(),
                "rollback during shutdown left files inconsistent"
            );
        }
        self.approvals.clear();
        self.rate.reset();
        info!(target: REGISTRY_TARGET, "tool registry shut down");
    }
}

fn sandbox_policy(config: &Config) -> SandboxPolicy {
    let cpu = (config.sandbox_cpu_seconds > 0).then(|| Duration::from_secs(config.sandbox_cpu_seconds));
    let memory = (config.sandbox_memory_bytes > 0).then_some(config.sandbox_memory_bytes);
    SandboxPolicy::new()
        .with_cpu_limit(cpu)
        .with_memory_limit(memory)
        .with_wall_timeout(Duration::from_millis(config.sandbox_wall_timeout_ms))
        .with_grace_period(Duration::from_millis(config.sandbox_grace_ms))
        .with_max_output_bytes(config.sandbox_max_output_bytes)
        .with_drop_privileges(config.drop_privileges())
}
