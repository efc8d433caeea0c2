use std::path::PathBuf;

use super::line_ending::LineEnding;
use super::{Staged, apply_batch, read_text};
use crate::registry::{EditFileArgs, ToolError, ToolOutput, ToolRegistry};
use crate::transaction::Operation;

#[derive(Debug)]
pub(crate) struct Plan {
    label: String,
    target: PathBuf,
    updated: String,
}

pub(super) fn prepare(registry: &ToolRegistry, args: &EditFileArgs) -> Result<Plan, ToolError> {
    let target = registry.workspace.resolve(&args.path)?;
    let original = read_text(&args.path, &target)?;
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let range = registry
        .lines
        .to_internal_range(args.start_line, args.end_line, lines.len())
        .map_err(|error| ToolError::validation(Some(&args.path), error.to_string()))?;

    let ending = LineEnding::detect(&original);
    let new_content = ending.map_or_else(
        || args.new_content.clone(),
        |ending| ending.apply(&args.new_content),
    );

    let mut updated = String::with_capacity(original.len() + new_content.len());
    for line in &lines[..range.start] {
        updated.push_str(line);
    }
    if !new_content.is_empty() {
        updated.push_str(&new_content);
        let terminated = lines
            .get(range.end - 1)
            .is_some_and(|line| line.ends_with('\n'));
        if terminated && !new_content.ends_with('\n') {
            updated.push_str(ending.map_or("\n", LineEnding::as_str));
        }
    }
    for line in &lines[range.end..] {
        updated.push_str(line);
    }

    Ok(Plan {
        label: args.path.clone(),
        target,
        updated,
    })
}

pub(super) fn execute(registry: &ToolRegistry, plan: Plan) -> Result<ToolOutput, ToolError> {
    let staged = [Staged {
        label: plan.label,
        operation: Operation::write(plan.target, plan.updated),
    }];
    let mut committed =
        apply_batch(registry, &staged).map_err(super::BatchFailure::into_single_error)?;
    let change = committed
        .changes
        .pop()
        .ok_or_else(|| ToolError::validation(None, "edit produced no change record"))?;
    Ok(ToolOutput::EditFile(change))
}
