//! Conversion between externally visible line numbers and buffer indices.

use thiserror::Error;

/// A line number or range the caller supplied that cannot address the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineIndexError {
    /// The line number precedes the first line.
    #[error("line {line} is before the first line ({first})")]
    BeforeFirstLine {
        /// Line number as supplied.
        line: i64,
        /// Smallest valid line number under the active convention.
        first: i64,
    },
    /// The range end precedes its start.
    #[error("range end {end} precedes range start {start}")]
    InvertedRange {
        /// Supplied start line.
        start: i64,
        /// Supplied end line.
        end: i64,
    },
    /// The range extends beyond the last line.
    #[error("line {line} is beyond the end of a {line_count}-line buffer")]
    PastEnd {
        /// Offending line number as supplied.
        line: i64,
        /// Number of lines in the buffer.
        line_count: usize,
    },
}

/// Maps external line numbers to zero-based indices and back.
///
/// Under the default one-based convention external line `n` is internal index
/// `n - 1`. With the convention disabled the mapping is the identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LineIndexer {
    one_based: bool,
}

impl Default for LineIndexer {
    fn default() -> Self {
        Self { one_based: true }
    }
}

impl LineIndexer {
    /// Creates an indexer for the given convention.
    #[must_use]
    pub const fn new(one_based: bool) -> Self {
        Self { one_based }
    }

    const fn offset(self) -> i64 {
        if self.one_based { 1 } else { 0 }
    }

    /// Converts an external line number to a buffer index.
    ///
    /// # Errors
    ///
    /// Returns [`LineIndexError::BeforeFirstLine`] when the number would
    /// produce a negative index.
    pub fn to_internal(self, line: i64) -> Result<usize, LineIndexError> {
        let first = self.offset();
        line.checked_sub(first)
            .and_then(|index| usize::try_from(index).ok())
            .ok_or(LineIndexError::BeforeFirstLine { line, first })
    }

    /// Converts a buffer index to an external line number.
    #[must_use]
    pub fn to_external(self, index: usize) -> usize {
        if self.one_based {
            index.saturating_add(1)
        } else {
            index
        }
    }

    /// Converts an inclusive external range to a half-open index range.
    ///
    /// # Errors
    ///
    /// Fails when either end is before the first line, when `end < start`,
    /// or when `end` lies past the last line of a `line_count`-line buffer.
    pub fn to_internal_range(
        self,
        start: i64,
        end: i64,
        line_count: usize,
    ) -> Result<std::ops::Range<usize>, LineIndexError> {
        let first = self.to_internal(start)?;
        let last = self.to_internal(end)?;
        if last < first {
            return Err(LineIndexError::InvertedRange { start, end });
        }
        if last >= line_count {
            return Err(LineIndexError::PastEnd {
                line: end,
                line_count,
            });
        }
        Ok(first..last + 1)
    }
}
