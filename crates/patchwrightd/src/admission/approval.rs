//! Invocations parked until a reviewer decides.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AdmissionError;

const APPROVAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::approval");

/// Handle naming one pending approval.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ApprovalId(u64);

impl ApprovalId {
    /// Wraps a raw id received from a client.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reviewer's answer to a pending approval.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Let the invocation run.
    Approve,
    /// Refuse the invocation.
    Deny {
        /// Why it was refused.
        reason: String,
    },
}

/// Public description of a parked invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingApproval {
    /// Handle used to resolve or cancel the approval.
    pub id: ApprovalId,
    /// Requesting principal.
    pub principal: String,
    /// Requested tool.
    pub tool: String,
    /// Seconds left before the approval expires.
    pub expires_in_secs: u64,
}

/// Outcome of resolving an approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    /// The parked payload, ready to resume.
    Approved(T),
    /// The reviewer refused; the payload is dropped.
    Denied {
        /// Principal whose invocation was refused.
        principal: String,
        /// Tool that was requested.
        tool: String,
        /// Reviewer's reason.
        reason: String,
    },
}

#[derive(Debug)]
struct Parked<T> {
    principal: String,
    tool: String,
    expires_at: Instant,
    payload: T,
}

impl<T> Parked<T> {
    fn describe(&self, id: ApprovalId, now: Instant) -> PendingApproval {
        PendingApproval {
            id,
            principal: self.principal.clone(),
            tool: self.tool.clone(),
            expires_in_secs: self.expires_at.saturating_duration_since(now).as_secs(),
        }
    }
}

/// Queue of invocations awaiting confirmation, each with a deadline.
#[derive(Debug)]
pub struct ApprovalQueue<T> {
    parked: DashMap<ApprovalId, Parked<T>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl<T> ApprovalQueue<T> {
    /// Creates a queue whose entries expire after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            parked: DashMap::new(),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Parks `payload` and returns its public description.
    ///
    /// Expired entries are dropped first, so abandoned approvals never pile
    /// up.
    pub fn submit(&self, principal: &str, tool: &str, payload: T) -> PendingApproval {
        self.purge_expired();
        let id = ApprovalId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let now = Instant::now();
        let parked = Parked {
            principal: principal.to_owned(),
            tool: tool.to_owned(),
            expires_at: now + self.timeout,
            payload,
        };
        let pending = parked.describe(id, now);
        self.parked.insert(id, parked);
        info!(target: APPROVAL_TARGET, approval = %id, principal, tool, "approval requested");
        pending
    }

    /// Applies a reviewer's decision to `id`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::UnknownApproval`] for unknown or already
    /// resolved ids and [`AdmissionError::ApprovalExpired`] when the deadline
    /// passed. Either way the entry is gone afterwards.
    pub fn resolve(
        &self,
        id: ApprovalId,
        decision: ApprovalDecision,
    ) -> Result<Resolution<T>, AdmissionError> {
        let (_, parked) = self
            .parked
            .remove(&id)
            .ok_or(AdmissionError::UnknownApproval { id })?;
        self.purge_expired();
        if Instant::now() >= parked.expires_at {
            info!(target: APPROVAL_TARGET, approval = %id, "approval expired");
            return Err(AdmissionError::ApprovalExpired { id });
        }
        match decision {
            ApprovalDecision::Approve => {
                info!(target: APPROVAL_TARGET, approval = %id, "approval granted");
                Ok(Resolution::Approved(parked.payload))
            }
            ApprovalDecision::Deny { reason } => {
                info!(target: APPROVAL_TARGET, approval = %id, %reason, "approval denied");
                Ok(Resolution::Denied {
                    principal: parked.principal,
                    tool: parked.tool,
                    reason,
                })
            }
        }
    }

    /// Drops a pending approval without running it.
    ///
    /// Returns false when no such approval was pending.
    pub fn cancel(&self, id: ApprovalId) -> bool {
        self.parked.remove(&id).is_some()
    }

    /// Live approvals ordered by id. Expired entries are purged first.
    pub fn list(&self) -> Vec<PendingApproval> {
        self.purge_expired();
        let now = Instant::now();
        let mut pending: Vec<PendingApproval> = self
            .parked
            .iter()
            .map(|entry| entry.value().describe(*entry.key(), now))
            .collect();
        pending.sort_by_key(|approval| approval.id);
        pending
    }

    /// Removes expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.parked.len();
        self.parked.retain(|_, parked| parked.expires_at > now);
        before.saturating_sub(self.parked.len())
    }

    /// Drops every pending approval.
    pub fn clear(&self) {
        self.parked.clear();
    }
}
