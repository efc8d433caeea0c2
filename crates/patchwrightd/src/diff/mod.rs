//! Unified diff generation, parsing, and application.
//!
//! Text is treated as a sequence of lines that keep their `\n` terminators,
//! so a diff created from two buffers reproduces the new buffer byte for byte
//! when applied to the old one. A final line without a newline is carried
//! through the `\ No newline at end of file` marker.

mod apply;
mod create;
mod errors;
mod parse;
mod serialize;
mod types;


use tracing::debug;

pub use errors::{ApplyError, DiffError, ParseError};
pub use types::{DiffLine, Hunk, LineKind, UnifiedDiff};

const DIFF_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::diff");

/// Creates, renders, parses, and applies unified diffs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DiffEngine {
    context_lines: usize,
    merge_gap: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(3, 6)
    }
}

impl DiffEngine {
    /// Creates an engine with `context_lines` of context around each change.
    ///
    /// Change runs separated by at most `merge_gap` unchanged lines are
    /// emitted as one hunk.
    #[must_use]
    pub const fn new(context_lines: usize, merge_gap: usize) -> Self {
        Self {
            context_lines,
            merge_gap,
        }
    }

    /// Builds an engine from the resolved configuration.
    #[must_use]
    pub fn from_config(config: &patchwright_config::Config) -> Self {
        Self::new(config.diff_context_lines, config.merge_gap())
    }

    /// Unchanged lines emitted around each change.
    #[must_use]
    pub const fn context_lines(&self) -> usize {
        self.context_lines
    }

    /// Produces a minimal diff turning `old` into `new`.
    #[must_use]
    pub fn create_diff(&self, old: &str, new: &str, path: &str) -> UnifiedDiff {
        let diff = create::create_diff(old, new, path, self.context_lines, self.merge_gap);
        debug!(
            target: DIFF_TARGET,
            path,
            hunks = diff.hunks.len(),
            "created diff"
        );
        diff
    }

    /// Renders `diff` as unified diff text.
    #[must_use]
    pub fn serialize(&self, diff: &UnifiedDiff) -> String {
        serialize::serialize(diff)
    }

    /// Parses single-file unified diff text.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for malformed headers, bodies that disagree
    /// with their hunk counts, or text outside any recognised section.
    pub fn parse(&self, text: &str) -> Result<UnifiedDiff, ParseError> {
        parse::parse(text)
    }

    /// Applies `diff` to `original`, returning the patched text.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when a context or removed line does not match,
    /// or when hunks overlap or are out of order.
    pub fn apply(&self, original: &str, diff: &UnifiedDiff) -> Result<String, ApplyError> {
        apply::apply(original, diff).inspect_err(|error| {
            debug!(target: DIFF_TARGET, path = %diff.new_path, %error, "diff did not apply");
        })
    }

    /// Parses `text` and applies it to `original` in one step.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError`] wrapping either failure.
    pub fn apply_text(&self, original: &str, text: &str) -> Result<String, DiffError> {
        let diff = self.parse(text)?;
        Ok(self.apply(original, &diff)?)
    }
}
