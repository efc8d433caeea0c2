use std::fs;
use std::path::{Path, PathBuf};

use super::line_ending::LineEnding;
use super::{Staged, apply_batch};
use crate::registry::{ToolError, ToolOutput, ToolRegistry, WriteFileArgs};
use crate::transaction::Operation;

#[derive(Debug)]
pub(crate) struct Plan {
    label: String,
    target: PathBuf,
    content: String,
}

pub(super) fn prepare(registry: &ToolRegistry, args: &WriteFileArgs) -> Result<Plan, ToolError> {
    let target = registry.workspace.resolve(&args.path)?;
    if target.is_dir() {
        return Err(ToolError::validation(Some(&args.path), "path is a directory"));
    }
    if !args.overwrite && target.exists() {
        return Err(ToolError::validation(
            Some(&args.path),
            "file already exists and overwrite is false",
        ));
    }
    let content = existing_line_ending(&target).map_or_else(
        || args.content.clone(),
        |ending| ending.apply(&args.content),
    );
    Ok(Plan {
        label: args.path.clone(),
        target,
        content,
    })
}

/// Convention of the file being overwritten, if it is readable text.
fn existing_line_ending(target: &Path) -> Option<LineEnding> {
    fs::read_to_string(target)
        .ok()
        .and_then(|text| LineEnding::detect(&text))
}

pub(super) fn execute(registry: &ToolRegistry, plan: Plan) -> Result<ToolOutput, ToolError> {
    let staged = [Staged {
        label: plan.label,
        operation: Operation::write(plan.target, plan.content),
    }];
    let mut committed =
        apply_batch(registry, &staged).map_err(super::BatchFailure::into_single_error)?;
    let change = committed
        .changes
        .pop()
        .ok_or_else(|| ToolError::validation(None, "write produced no change record"))?;
    Ok(ToolOutput::WriteFile(change))
}
