//! Applying hunks to a text buffer.

use super::errors::ApplyError;
use super::types::{UnifiedDiff, split_lines};

/// Applies every hunk of `diff` to `original`.
///
/// The result is assembled in a fresh buffer, so `original` is never
/// observed half-patched: either every hunk applies or an error is returned.
pub(super) fn apply(original: &str, diff: &UnifiedDiff) -> Result<String, ApplyError> {
    let lines = split_lines(original);
    let mut out = String::with_capacity(original.len());
    let mut cursor = 0;
    // Cumulative new_count - old_count of the hunks applied so far.
    let mut shift: isize = 0;

    for (hunk_index, hunk) in diff.hunks.iter().enumerate() {
        if hunk.counted_old() != hunk.old_count || hunk.counted_new() != hunk.new_count {
            return Err(ApplyError::MalformedHunk {
                hunk_index,
                reason: format!(
                    "header declares {} old and {} new lines but the body holds {} and {}",
                    hunk.old_count,
                    hunk.new_count,
                    hunk.counted_old(),
                    hunk.counted_new()
                ),
            });
        }
        let position = hunk.old_position().ok_or_else(|| ApplyError::MalformedHunk {
            hunk_index,
            reason: "hunk with lines cannot start at line 0".to_owned(),
        })?;
        if position < cursor {
            return Err(ApplyError::HunkOutOfOrder { hunk_index });
        }
        if position > lines.len() {
            return Err(mismatch(hunk_index, hunk_first_old(hunk), None, position, shift));
        }

        for line in &lines[cursor..position] {
            out.push_str(line);
        }

        let mut old_index = position;
        for line in &hunk.lines {
            if line.kind.in_old() {
                let found = lines.get(old_index).copied();
                if !found.is_some_and(|raw| line.matches_raw(raw)) {
                    return Err(mismatch(
                        hunk_index,
                        line.text.clone(),
                        found,
                        old_index,
                        shift,
                    ));
                }
                old_index += 1;
            }
            if line.kind.in_new() {
                line.push_raw(&mut out);
            }
        }

        cursor = old_index;
        shift += signed(hunk.new_count) - signed(hunk.old_count);
    }

    for line in &lines[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

fn hunk_first_old(hunk: &super::types::Hunk) -> String {
    hunk.lines
        .iter()
        .find(|line| line.kind.in_old())
        .map(|line| line.text.clone())
        .unwrap_or_default()
}

fn mismatch(
    hunk_index: usize,
    expected: String,
    found: Option<&str>,
    original_index: usize,
    shift: isize,
) -> ApplyError {
    let line = original_index
        .saturating_add_signed(shift)
        .saturating_add(1);
    ApplyError::ContextMismatch {
        hunk_index,
        expected,
        found: found.map(|raw| raw.strip_suffix('\n').unwrap_or(raw).to_owned()),
        line,
    }
}

fn signed(count: usize) -> isize {
    isize::try_from(count).unwrap_or(isize::MAX)
}
