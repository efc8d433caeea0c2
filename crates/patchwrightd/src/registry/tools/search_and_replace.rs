use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use regex::{NoExpand, Regex, RegexBuilder};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::{Staged, TOOLS_TARGET, apply_batch, read_text};
use crate::registry::{SearchAndReplaceArgs, ToolError, ToolOutput, ToolRegistry, Workspace};
use crate::transaction::Operation;

#[derive(Debug)]
pub(crate) struct Plan {
    staged: Vec<Staged>,
}

pub(super) fn prepare(
    registry: &ToolRegistry,
    args: &SearchAndReplaceArgs,
) -> Result<Plan, ToolError> {
    if args.pattern.is_empty() {
        return Err(ToolError::validation(None, "search pattern is empty"));
    }
    let root = registry.workspace.resolve(&args.path)?;
    let regex = build_regex(args)?;

    let mut staged = Vec::new();
    for target in candidate_files(&registry.workspace, &args.path, &root)? {
        let label = registry.workspace.relative(&target);
        let original = if target == root {
            read_text(&args.path, &target)?
        } else {
            match fs::read(&target).map(String::from_utf8) {
                Ok(Ok(text)) => text,
                _ => {
                    debug!(target: TOOLS_TARGET, path = %label, "skipping unreadable or binary file");
                    continue;
                }
            }
        };
        let Some(updated) = replace(&regex, args, &original) else {
            continue;
        };
        staged.push(Staged {
            label,
            operation: Operation::write(target, updated),
        });
    }
    Ok(Plan { staged })
}

fn build_regex(args: &SearchAndReplaceArgs) -> Result<Regex, ToolError> {
    let pattern: Cow<'_, str> = if args.is_regex {
        Cow::Borrowed(&args.pattern)
    } else {
        Cow::Owned(regex::escape(&args.pattern))
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(args.case_insensitive)
        .build()
        .map_err(|error| ToolError::validation(None, format!("invalid pattern: {error}")))
}

/// Files under `root` in sorted path order, or `root` itself for a file.
///
/// The walk skips `.git` and everything the ignore file excludes.
fn candidate_files(
    workspace: &Workspace,
    label: &str,
    root: &Path,
) -> Result<Vec<PathBuf>, ToolError> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.is_dir() {
        return Err(ToolError::validation(Some(label), "path does not exist"));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !is_vcs_dir(entry) && !workspace.is_excluded(entry.path(), entry.file_type().is_dir())
        })
    {
        let entry = entry.map_err(|error| ToolError::Io {
            path: label.to_owned(),
            action: "walk",
            source: error.into(),
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_vcs_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == ".git"
}

/// New content, or `None` when nothing matched.
fn replace(regex: &Regex, args: &SearchAndReplaceArgs, original: &str) -> Option<String> {
    if !regex.is_match(original) {
        return None;
    }
    let limit = usize::from(!args.replace_all);
    let updated = if args.is_regex {
        regex.replacen(original, limit, args.replacement.as_str())
    } else {
        regex.replacen(original, limit, NoExpand(&args.replacement))
    };
    (updated != original).then(|| updated.into_owned())
}

pub(super) fn execute(registry: &ToolRegistry, plan: &Plan) -> Result<ToolOutput, ToolError> {
    if plan.staged.is_empty() {
        return Ok(ToolOutput::SearchAndReplace(Vec::new()));
    }
    let committed = match apply_batch(registry, &plan.staged) {
        Ok(committed) => committed,
        Err(failure) if plan.staged.len() == 1 => return Err(failure.into_single_error()),
        Err(failure) => return Err(failure.into_batch_error()),
    };
    debug!(
        target: TOOLS_TARGET,
        transaction = %committed.transaction,
        files = committed.changes.len(),
        "replacement committed"
    );
    Ok(ToolOutput::SearchAndReplace(committed.changes))
}
