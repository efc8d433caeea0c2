//! Keeping a file's line-break convention across rewrites.

/// Line-break convention of a text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    /// Convention used by every line break in `text`.
    ///
    /// `None` when `text` has no line breaks or mixes both kinds; such
    /// content is written exactly as supplied.
    pub(super) fn detect(text: &str) -> Option<Self> {
        let breaks = text.matches('\n').count();
        let crlf = text.matches("\r\n").count();
        match (breaks, crlf) {
            (0, _) => None,
            (_, 0) => Some(Self::Lf),
            (breaks, crlf) if breaks == crlf => Some(Self::CrLf),
            _ => None,
        }
    }

    pub(super) const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }

    /// Rewrites every line break in `text` to this convention.
    pub(super) fn apply(self, text: &str) -> String {
        let unix = text.replace("\r\n", "\n");
        match self {
            Self::Lf => unix,
            Self::CrLf => unix.replace('\n', "\r\n"),
        }
    }
}
