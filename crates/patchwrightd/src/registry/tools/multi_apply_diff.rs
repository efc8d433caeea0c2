use tracing::info;

use super::{Staged, TOOLS_TARGET, apply_batch};
use crate::registry::{
    BatchResult, MultiApplyDiffArgs, ToolError, ToolOutput, ToolRegistry,
};
use crate::transaction::Operation;

#[derive(Debug)]
pub(crate) struct Plan {
    staged: Vec<Staged>,
}

/// Resolves every path and parses every diff before anything is written.
pub(super) fn prepare(
    registry: &ToolRegistry,
    args: &MultiApplyDiffArgs,
) -> Result<Plan, ToolError> {
    if args.operations.is_empty() {
        return Err(ToolError::validation(None, "no operations supplied"));
    }
    let staged = args
        .operations
        .iter()
        .map(|file| {
            let target = registry.workspace.resolve(&file.path)?;
            let diff = registry
                .diff
                .parse(&file.diff)
                .map_err(|source| ToolError::Parse {
                    path: file.path.clone(),
                    source,
                })?;
            Ok(Staged {
                label: file.path.clone(),
                operation: Operation::apply_diff(target, diff),
            })
        })
        .collect::<Result<Vec<_>, ToolError>>()?;
    Ok(Plan { staged })
}

pub(super) fn execute(registry: &ToolRegistry, plan: &Plan) -> Result<ToolOutput, ToolError> {
    let committed =
        apply_batch(registry, &plan.staged).map_err(super::BatchFailure::into_batch_error)?;
    info!(
        target: TOOLS_TARGET,
        transaction = %committed.transaction,
        files = committed.changes.len(),
        "diff batch committed"
    );
    Ok(ToolOutput::MultiApplyDiff(BatchResult {
        transaction: committed.transaction.to_string(),
        changes: committed.changes,
    }))
}
