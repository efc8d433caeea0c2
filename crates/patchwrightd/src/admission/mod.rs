//! Admission control applied before a tool runs.
//!
//! Invocations pass the [`PermissionGate`] first and then draw a token from
//! the [`RateLimiter`]. A rule may demand human confirmation, in which case
//! the invocation is parked in an [`ApprovalQueue`] until someone approves,
//! denies, or the approval expires.

mod approval;
mod permission;
mod rate_limit;

use std::time::Duration;

use thiserror::Error;

pub use approval::{ApprovalDecision, ApprovalId, ApprovalQueue, PendingApproval, Resolution};
pub use permission::{Decision, PermissionGate, PermissionRequest, PermissionRule, Selector};
pub use rate_limit::RateLimiter;

/// Reasons an invocation is refused admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The caller's token bucket for this tool is empty.
    #[error("rate limit exceeded for {principal} on {tool}; retry after {} ms", .retry_after.as_millis())]
    RateLimited {
        /// Requesting principal.
        principal: String,
        /// Requested tool.
        tool: String,
        /// Time until the next token is available.
        retry_after: Duration,
    },
    /// A rule or reviewer refused the invocation.
    #[error("permission denied for {principal} on {tool}: {reason}")]
    PermissionDenied {
        /// Requesting principal.
        principal: String,
        /// Requested tool.
        tool: String,
        /// Why the invocation was refused.
        reason: String,
    },
    /// No pending approval has this id.
    #[error("no pending approval with id {id}")]
    UnknownApproval {
        /// Requested approval id.
        id: ApprovalId,
    },
    /// The approval outlived its timeout before being resolved.
    #[error("approval {id} expired before it was resolved")]
    ApprovalExpired {
        /// Expired approval id.
        id: ApprovalId,
    },
}
