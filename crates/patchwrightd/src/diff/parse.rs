//! Parsing unified diff text.

use super::errors::ParseError;
use super::serialize::no_newline_marker;
use super::types::{DiffLine, Hunk, LineKind, UnifiedDiff};

/// Extended header lines emitted by git ahead of the `---` line.
const GIT_PREAMBLE: [&str; 12] = [
    "diff --git ",
    "index ",
    "new file mode ",
    "deleted file mode ",
    "old mode ",
    "new mode ",
    "similarity index ",
    "dissimilarity index ",
    "rename from ",
    "rename to ",
    "copy from ",
    "copy to ",
];

/// Hunk being filled, with the body lines still owed by its header.
struct OpenHunk {
    hunk: Hunk,
    header_position: usize,
    old_remaining: usize,
    new_remaining: usize,
}

impl OpenHunk {
    const fn is_complete(&self) -> bool {
        self.old_remaining == 0 && self.new_remaining == 0
    }

    fn push(&mut self, kind: LineKind, text: &str, position: usize) -> Result<(), ParseError> {
        if kind.in_old() {
            self.old_remaining = self.old_remaining.checked_sub(1).ok_or_else(|| {
                ParseError::new(position, "hunk body has more old lines than its header")
            })?;
        }
        if kind.in_new() {
            self.new_remaining = self.new_remaining.checked_sub(1).ok_or_else(|| {
                ParseError::new(position, "hunk body has more new lines than its header")
            })?;
        }
        self.hunk.lines.push(DiffLine {
            kind,
            text: text.to_owned(),
            missing_newline: false,
        });
        Ok(())
    }

    fn finish(self) -> Result<Hunk, ParseError> {
        if self.is_complete() {
            Ok(self.hunk)
        } else {
            Err(ParseError::new(
                self.header_position,
                format!(
                    "hunk body is short by {} old and {} new lines",
                    self.old_remaining, self.new_remaining
                ),
            ))
        }
    }
}

pub(super) fn parse(text: &str) -> Result<UnifiedDiff, ParseError> {
    let mut lines = text
        .split('\n')
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .peekable();

    // A trailing newline yields one empty final segment that carries no line.
    let total = text.split('\n').count();
    let last_is_terminator = text.ends_with('\n') || text.is_empty();

    let mut old_path = None;
    while let Some(&(position, line)) = lines.peek() {
        if GIT_PREAMBLE.iter().any(|prefix| line.starts_with(prefix)) {
            lines.next();
            continue;
        }
        if let Some(label) = line.strip_prefix("--- ") {
            old_path = Some(parse_label(label, "a/"));
            lines.next();
            break;
        }
        if position == total && last_is_terminator {
            break;
        }
        return Err(ParseError::new(position, "expected '---' file header"));
    }
    let Some(old_path) = old_path else {
        return Err(ParseError::new(total, "missing '---' file header"));
    };

    let new_path = match lines.next() {
        Some((_, line)) if line.starts_with("+++ ") => parse_label(&line[4..], "b/"),
        Some((position, _)) => {
            return Err(ParseError::new(position, "expected '+++' file header"));
        }
        None => return Err(ParseError::new(total, "missing '+++' file header")),
    };

    let mut hunks = Vec::new();
    let mut open: Option<OpenHunk> = None;
    for (position, line) in lines {
        if position == total && last_is_terminator && line.is_empty() {
            break;
        }
        if line.starts_with("@@") {
            if let Some(current) = open.take() {
                hunks.push(current.finish()?);
            }
            open = Some(parse_header(line, position)?);
            continue;
        }
        let Some(current) = open.as_mut() else {
            return Err(ParseError::new(position, "text outside any hunk"));
        };
        if line.starts_with('\\') {
            if line != no_newline_marker() {
                return Err(ParseError::new(position, "unrecognised marker line"));
            }
            let Some(previous) = current.hunk.lines.last_mut() else {
                return Err(ParseError::new(position, "marker line before any hunk line"));
            };
            previous.missing_newline = true;
            continue;
        }
        if current.is_complete() {
            let reason = if line.starts_with("--- ") {
                "unexpected second file header"
            } else {
                "text outside any hunk: body exceeds header counts"
            };
            return Err(ParseError::new(position, reason));
        }
        let (kind, body) = match line.chars().next() {
            Some(' ') => (LineKind::Context, &line[1..]),
            Some('-') => (LineKind::Removed, &line[1..]),
            Some('+') => (LineKind::Added, &line[1..]),
            // Some tools strip the single space of an empty context line.
            None => (LineKind::Context, ""),
            Some(_) => {
                return Err(ParseError::new(
                    position,
                    "hunk line must start with ' ', '-' or '+'",
                ));
            }
        };
        current.push(kind, body, position)?;
    }
    if let Some(current) = open.take() {
        hunks.push(current.finish()?);
    }

    Ok(UnifiedDiff {
        old_path,
        new_path,
        hunks,
    })
}

fn parse_label(raw: &str, prefix: &str) -> String {
    let label = raw.split('\t').next().unwrap_or(raw).trim_end();
    if label == UnifiedDiff::DEV_NULL {
        return label.to_owned();
    }
    label.strip_prefix(prefix).unwrap_or(label).to_owned()
}

fn parse_header(line: &str, position: usize) -> Result<OpenHunk, ParseError> {
    let malformed = || ParseError::new(position, format!("malformed hunk header {line:?}"));
    let rest = line.strip_prefix("@@ ").ok_or_else(malformed)?;
    let (ranges, _section) = rest.split_once(" @@").ok_or_else(malformed)?;
    let (old, new) = ranges.split_once(' ').ok_or_else(malformed)?;
    let (old_start, old_count) = old
        .strip_prefix('-')
        .and_then(parse_range)
        .ok_or_else(malformed)?;
    let (new_start, new_count) = new
        .strip_prefix('+')
        .and_then(parse_range)
        .ok_or_else(malformed)?;
    if (old_count > 0 && old_start == 0) || (new_count > 0 && new_start == 0) {
        return Err(ParseError::new(
            position,
            "hunk with lines cannot start at line 0",
        ));
    }
    Ok(OpenHunk {
        hunk: Hunk {
            old_start,
            old_count,
            new_start,
            new_count,
            lines: Vec::new(),
        },
        header_position: position,
        old_remaining: old_count,
        new_remaining: new_count,
    })
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}
