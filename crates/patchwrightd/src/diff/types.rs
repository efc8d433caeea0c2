//! Data model for unified diffs.

use serde::Serialize;

/// Role of a line within a hunk.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Present in both the old and new text.
    Context,
    /// Present only in the new text.
    Added,
    /// Present only in the old text.
    Removed,
}

impl LineKind {
    pub(crate) const fn prefix(self) -> char {
        match self {
            Self::Context => ' ',
            Self::Added => '+',
            Self::Removed => '-',
        }
    }

    pub(crate) const fn in_old(self) -> bool {
        matches!(self, Self::Context | Self::Removed)
    }

    pub(crate) const fn in_new(self) -> bool {
        matches!(self, Self::Context | Self::Added)
    }
}

/// One line of a hunk body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    /// Role of the line.
    pub kind: LineKind,
    /// Line content without its terminating newline.
    pub text: String,
    /// True when the line is the last of its file and has no newline.
    pub missing_newline: bool,
}

impl DiffLine {
    /// Builds a diff line from a raw line that may carry its `\n`.
    pub(crate) fn from_raw(kind: LineKind, raw: &str) -> Self {
        match raw.strip_suffix('\n') {
            Some(text) => Self {
                kind,
                text: text.to_owned(),
                missing_newline: false,
            },
            None => Self {
                kind,
                text: raw.to_owned(),
                missing_newline: true,
            },
        }
    }

    /// Returns true when `raw` holds exactly this line's bytes.
    pub(crate) fn matches_raw(&self, raw: &str) -> bool {
        match raw.strip_suffix('\n') {
            Some(text) => !self.missing_newline && text == self.text,
            None => self.missing_newline && raw == self.text,
        }
    }

    pub(crate) fn push_raw(&self, out: &mut String) {
        out.push_str(&self.text);
        if !self.missing_newline {
            out.push('\n');
        }
    }
}

/// A contiguous region of change with its surrounding context.
///
/// Starts are one-based line numbers. A hunk with a zero count on one side
/// names the line after which the change sits, so `old_start` is `0` for an
/// insertion at the top of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hunk {
    /// First old line covered by the hunk.
    pub old_start: usize,
    /// Number of old lines (context plus removed).
    pub old_count: usize,
    /// First new line covered by the hunk.
    pub new_start: usize,
    /// Number of new lines (context plus added).
    pub new_count: usize,
    /// Body lines in order.
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// Zero-based index of the first old line the hunk touches.
    pub(crate) const fn old_position(&self) -> Option<usize> {
        if self.old_count == 0 {
            Some(self.old_start)
        } else {
            self.old_start.checked_sub(1)
        }
    }

    pub(crate) fn counted_old(&self) -> usize {
        self.lines.iter().filter(|line| line.kind.in_old()).count()
    }

    pub(crate) fn counted_new(&self) -> usize {
        self.lines.iter().filter(|line| line.kind.in_new()).count()
    }

    /// Returns true when the hunk adds or removes anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(|line| line.kind != LineKind::Context)
    }
}

/// A single-file unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifiedDiff {
    /// Label of the original file, without any `a/` prefix.
    pub old_path: String,
    /// Label of the updated file, without any `b/` prefix.
    pub new_path: String,
    /// Hunks in ascending file order.
    pub hunks: Vec<Hunk>,
}

impl UnifiedDiff {
    /// Label used for a side that does not exist.
    pub const DEV_NULL: &'static str = "/dev/null";

    /// Returns true when applying the diff leaves the text unchanged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.hunks.iter().any(Hunk::has_changes)
    }

    /// Number of added and removed lines across all hunks.
    #[must_use]
    pub fn line_stats(&self) -> (usize, usize) {
        self.hunks
            .iter()
            .flat_map(|hunk| &hunk.lines)
            .fold((0, 0), |(added, removed), line| match line.kind {
                LineKind::Added => (added + 1, removed),
                LineKind::Removed => (added, removed + 1),
                LineKind::Context => (added, removed),
            })
    }
}

/// Splits `text` into lines that keep their `\n` terminators.
pub(crate) fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}
