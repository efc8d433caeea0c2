//! Errors raised while parsing or applying diffs.

use thiserror::Error;

/// Malformed diff text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("diff parse error at line {position}: {reason}")]
pub struct ParseError {
    /// One-based line of the diff text where parsing failed.
    pub position: usize,
    /// What was wrong with that line.
    pub reason: String,
}

impl ParseError {
    pub(crate) fn new(position: usize, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

/// Failures while applying a diff to a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// A context or removed line did not match the buffer.
    #[error(
        "context mismatch at line {line} (hunk {}): expected {expected:?}, found {}",
        .hunk_index + 1,
        describe_found(.found.as_deref())
    )]
    ContextMismatch {
        /// Zero-based index of the failing hunk.
        hunk_index: usize,
        /// Expected line content without its newline.
        expected: String,
        /// Buffer content at that position, or `None` past the end.
        found: Option<String>,
        /// One-based line in the buffer being patched.
        line: usize,
    },
    /// A hunk starts before the end of its predecessor.
    #[error("hunk {} overlaps or precedes the previous hunk", .hunk_index + 1)]
    HunkOutOfOrder {
        /// Zero-based index of the offending hunk.
        hunk_index: usize,
    },
    /// A hunk's header disagrees with its body.
    #[error("hunk {} is malformed: {reason}", .hunk_index + 1)]
    MalformedHunk {
        /// Zero-based index of the offending hunk.
        hunk_index: usize,
        /// Description of the inconsistency.
        reason: String,
    },
}

fn describe_found(found: Option<&str>) -> String {
    found.map_or_else(|| "end of file".to_owned(), |text| format!("{text:?}"))
}

/// Any diff engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// The diff text could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The diff did not apply.
    #[error(transparent)]
    Apply(#[from] ApplyError),
}
