//! Response serialisation for the dispatch loop.

use std::io::Write;

use serde::Serialize;
use serde_json::Value;

use super::errors::DispatchError;
use crate::admission::{ApprovalId, PendingApproval};
use crate::registry::{ErrorEnvelope, ToolOutcome};

/// Result of an administrative action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminReply {
    /// Invocations awaiting approval.
    Approvals {
        /// Live approvals ordered by id.
        approvals: Vec<PendingApproval>,
    },
    /// Outcome of a cancellation.
    Cancelled {
        /// Approval handle.
        id: ApprovalId,
        /// False when nothing was pending under that id.
        cancelled: bool,
    },
    /// The permission table was replaced.
    RulesReplaced {
        /// Number of rules now in force.
        count: usize,
    },
}

/// Payload of one response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// A tool ran or was parked.
    Outcome(ToolOutcome),
    /// An administrative action completed.
    Admin(AdminReply),
    /// Something failed.
    Error(ErrorEnvelope),
}

/// One JSONL response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaemonResponse {
    /// Correlation id copied from the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// The payload.
    #[serde(flatten)]
    pub body: ResponseBody,
}

/// Writer that frames responses as JSONL.
pub struct ResponseWriter<W> {
    writer: W,
}

impl<W: Write> ResponseWriter<W> {
    /// Wraps `writer`.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes `response` as one line and flushes.
    ///
    /// # Errors
    ///
    /// Fails when serialisation or writing fails.
    pub fn write_response(&mut self, response: &DaemonResponse) -> Result<(), DispatchError> {
        serde_json::to_writer(&mut self.writer, response)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Unwraps the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_line_per_response() {
        let mut writer = ResponseWriter::new(Vec::new());
        let response = DaemonResponse {
            id: Some(Value::from("req-1")),
            body: ResponseBody::Admin(AdminReply::RulesReplaced { count: 2 }),
        };
        writer.write_response(&response).expect("write response");
        let text = String::from_utf8(writer.into_inner()).expect("utf8");
        assert_eq!(text, "{\"id\":\"req-1\",\"status\":\"rules_replaced\",\"count\":2}\n");
    }

    #[test]
    fn omits_missing_ids() {
        let mut writer = ResponseWriter::new(Vec::new());
        let response = DaemonResponse {
            id: None,
            body: ResponseBody::Error(DispatchError::malformed("bad").envelope()),
        };
        writer.write_response(&response).expect("write response");
        let value: Value = serde_json::from_slice(&writer.into_inner()).expect("json");
        assert_eq!(value["status"], "error");
        assert_eq!(value["kind"], "malformed_request");
        assert!(value.get("id").is_none());
    }
}
