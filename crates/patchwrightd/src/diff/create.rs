//! Minimal edit scripts and hunk grouping.

use super::types::{DiffLine, Hunk, LineKind, UnifiedDiff, split_lines};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Edit {
    Keep,
    Delete,
    Insert,
}

/// One step of the edit script with the old/new positions before it.
#[derive(Debug, Copy, Clone)]
struct Step {
    edit: Edit,
    old: usize,
    new: usize,
}

pub(super) fn create_diff(
    old: &str,
    new: &str,
    path: &str,
    context: usize,
    merge_gap: usize,
) -> UnifiedDiff {
    let old_lines = split_lines(old);
    let new_lines = split_lines(new);
    let steps = edit_script(&old_lines, &new_lines);
    let hunks = group_hunks(&steps, context, merge_gap)
        .into_iter()
        .map(|range| build_hunk(&steps, range, &old_lines, &new_lines))
        .collect();
    UnifiedDiff {
        old_path: path.to_owned(),
        new_path: path.to_owned(),
        hunks,
    }
}

/// Computes a minimal edit script over whole lines.
///
/// Deletions are preferred over insertions whenever both keep the script
/// minimal, so removed lines precede added lines within a change.
fn edit_script(old: &[&str], new: &[&str]) -> Vec<Step> {
    let prefix = old
        .iter()
        .zip(new)
        .take_while(|(left, right)| left == right)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(left, right)| left == right)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut edits = Vec::with_capacity(old.len() + new.len());
    edits.extend(std::iter::repeat_n(Edit::Keep, prefix));
    edits.extend(lcs_edits(old_mid, new_mid));
    edits.extend(std::iter::repeat_n(Edit::Keep, suffix));

    let mut steps = Vec::with_capacity(edits.len());
    let (mut old_pos, mut new_pos) = (0, 0);
    for edit in edits {
        steps.push(Step {
            edit,
            old: old_pos,
            new: new_pos,
        });
        match edit {
            Edit::Keep => {
                old_pos += 1;
                new_pos += 1;
            }
            Edit::Delete => old_pos += 1,
            Edit::Insert => new_pos += 1,
        }
    }
    steps
}

fn lcs_edits(old: &[&str], new: &[&str]) -> Vec<Edit> {
    let width = new.len() + 1;
    // table[i * width + j] holds the LCS length of old[i..] and new[j..].
    let mut table = vec![0_u32; (old.len() + 1) * width];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            table[i * width + j] = if old[i] == new[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut edits = Vec::with_capacity(old.len() + new.len());
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            edits.push(Edit::Keep);
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            edits.push(Edit::Delete);
            i += 1;
        } else {
            edits.push(Edit::Insert);
            j += 1;
        }
    }
    edits.extend(std::iter::repeat_n(Edit::Delete, old.len() - i));
    edits.extend(std::iter::repeat_n(Edit::Insert, new.len() - j));
    edits
}

/// Returns half-open step ranges, one per hunk, including context.
///
/// Change runs separated by at most `merge_gap` unchanged lines share a hunk.
/// Context never crosses into a neighbouring hunk, so hunks do not overlap.
fn group_hunks(steps: &[Step], context: usize, merge_gap: usize) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for (index, step) in steps.iter().enumerate() {
        if step.edit == Edit::Keep {
            continue;
        }
        match runs.last_mut() {
            Some((_, end)) if index - *end <= merge_gap => *end = index + 1,
            _ => runs.push((index, index + 1)),
        }
    }

    let mut ranges = Vec::with_capacity(runs.len());
    let mut previous_end = 0;
    for (position, &(start, end)) in runs.iter().enumerate() {
        let next_start = runs.get(position + 1).map_or(steps.len(), |run| run.0);
        let lead = start.saturating_sub(context).max(previous_end);
        let trail = end.saturating_add(context).min(next_start);
        ranges.push((lead, trail));
        previous_end = trail;
    }
    ranges
}

fn build_hunk(steps: &[Step], (lead, trail): (usize, usize), old: &[&str], new: &[&str]) -> Hunk {
    let window = &steps[lead..trail];
    let lines: Vec<DiffLine> = window
        .iter()
        .map(|step| match step.edit {
            Edit::Keep => DiffLine::from_raw(LineKind::Context, old[step.old]),
            Edit::Delete => DiffLine::from_raw(LineKind::Removed, old[step.old]),
            Edit::Insert => DiffLine::from_raw(LineKind::Added, new[step.new]),
        })
        .collect();

    let (first_old, first_new) = window
        .first()
        .map_or((0, 0), |step| (step.old, step.new));
    let old_count = lines.iter().filter(|line| line.kind.in_old()).count();
    let new_count = lines.iter().filter(|line| line.kind.in_new()).count();
    Hunk {
        old_start: header_start(first_old, old_count),
        old_count,
        new_start: header_start(first_new, new_count),
        new_count,
        lines,
    }
}

const fn header_start(position: usize, count: usize) -> usize {
    if count == 0 { position } else { position + 1 }
}
