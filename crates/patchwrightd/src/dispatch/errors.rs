//! Failures of the request loop itself, as opposed to tool failures.

use std::io;

use thiserror::Error;

use crate::registry::ErrorEnvelope;

/// Errors surfaced while reading, parsing, or answering request lines.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The line is not a JSON request the daemon understands.
    #[error("malformed request: {message}")]
    MalformedRequest {
        /// Parser message.
        message: String,
        /// Underlying parser error, when there is one.
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The line exceeds the request size limit.
    #[error("request of {size} bytes exceeds the {max_size} byte limit")]
    RequestTooLarge {
        /// Bytes read before giving up.
        size: usize,
        /// Configured limit.
        max_size: usize,
    },

    /// Reading requests or writing responses failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A response could not be serialised.
    #[error("response could not be encoded: {0}")]
    EncodeResponse(#[from] serde_json::Error),
}

impl DispatchError {
    /// Wraps a JSON decoding failure.
    pub fn invalid_json(source: serde_json::Error) -> Self {
        Self::MalformedRequest {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// A malformed request with no underlying parser error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
            source: None,
        }
    }

    /// Whether the loop can answer this error and carry on.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest { .. } | Self::RequestTooLarge { .. }
        )
    }

    /// Stable machine-readable error category.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest { .. } => "malformed_request",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::Io(_) => "io_error",
            Self::EncodeResponse(_) => "internal_error",
        }
    }

    /// Error envelope sent to clients.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            status: "error",
            kind: self.kind(),
            message: self.to_string(),
            details: None,
        }
    }
}
