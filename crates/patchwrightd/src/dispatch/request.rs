//! Request deserialisation for the dispatch loop.
//!
//! Each line carries exactly one of three request shapes:
//!
//! - a tool invocation: `{"principal", "tool", "arguments"}`;
//! - an approval decision: `{"approval": {"id", "decision", "reason"?}}`;
//! - an administrative action: `{"admin": {"action", ...}}`.
//!
//! Any shape may carry an `id`, echoed verbatim in the response.

use std::io::BufRead;

use serde::Deserialize;
use serde_json::Value;

use super::errors::DispatchError;
use crate::admission::{ApprovalDecision, ApprovalId, PermissionRule};

/// Parsed request line.
#[derive(Debug, Deserialize)]
pub struct RequestEnvelope {
    /// Client correlation id.
    #[serde(default)]
    pub id: Option<Value>,
    /// What the client asked for.
    #[serde(flatten)]
    pub body: DaemonRequest,
}

/// The three request shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DaemonRequest {
    /// Run a tool.
    Invoke {
        /// Requesting principal.
        principal: String,
        /// Tool name.
        tool: String,
        /// Tool arguments.
        #[serde(default = "empty_arguments")]
        arguments: Value,
    },
    /// Decide a parked invocation.
    Approval {
        /// The decision.
        approval: ApprovalReply,
    },
    /// Inspect or reconfigure admission control.
    Admin {
        /// The action.
        admin: AdminCommand,
    },
}

fn empty_arguments() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Reviewer's answer to a pending approval.
#[derive(Debug, Deserialize)]
pub struct ApprovalReply {
    /// Approval handle.
    pub id: ApprovalId,
    /// Approve or deny with a reason.
    #[serde(flatten)]
    pub decision: ApprovalDecision,
}

/// Administrative actions.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminCommand {
    /// List invocations awaiting approval.
    ListApprovals,
    /// Drop a parked invocation.
    CancelApproval {
        /// Approval handle.
        id: ApprovalId,
    },
    /// Replace the permission table.
    SetRules {
        /// New rules, first match wins.
        rules: Vec<PermissionRule>,
    },
}

impl RequestEnvelope {
    /// Parses a JSONL line into a request.
    ///
    /// Trailing whitespace, including the newline delimiter, is trimmed
    /// before parsing.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MalformedRequest`] for empty lines and lines
    /// that match none of the request shapes.
    pub fn parse(line: &[u8]) -> Result<Self, DispatchError> {
        let trimmed = line.trim_ascii_end();
        if trimmed.is_empty() {
            return Err(DispatchError::malformed("empty request line"));
        }
        serde_json::from_slice(trimmed).map_err(DispatchError::invalid_json)
    }
}

/// Reads one request line of at most `max_bytes`.
///
/// Returns `Ok(None)` at end of input. An oversized line is consumed up to
/// its newline and reported as [`DispatchError::RequestTooLarge`], leaving
/// the reader at the start of the next line.
///
/// # Errors
///
/// Fails on read errors and oversized lines.
pub fn read_request_line<R: BufRead>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<Option<Vec<u8>>, DispatchError> {
    let mut line = Vec::new();
    let mut size = 0_usize;
    let mut oversized = false;
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            break;
        }
        let (chunk, done) = match available.iter().position(|byte| *byte == b'\n') {
            Some(newline) => (&available[..=newline], true),
            None => (available, false),
        };
        let consumed = chunk.len();
        size += consumed;
        if size > max_bytes {
            oversized = true;
            line.clear();
        } else {
            line.extend_from_slice(chunk);
        }
        reader.consume(consumed);
        if done {
            break;
        }
    }
    if oversized {
        return Err(DispatchError::RequestTooLarge {
            size,
            max_size: max_bytes,
        });
    }
    Ok((size > 0).then_some(line))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn parses_tool_invocations() {
        let request = RequestEnvelope::parse(
            br#"{"id":7,"principal":"alice","tool":"write_file","arguments":{"path":"a","content":"b"}}"#,
        )
        .expect("parse invocation");
        assert_eq!(request.id, Some(Value::from(7)));
        let DaemonRequest::Invoke {
            principal, tool, ..
        } = request.body
        else {
            panic!("expected an invocation");
        };
        assert_eq!(principal, "alice");
        assert_eq!(tool, "write_file");
    }

    #[test]
    fn missing_arguments_default_to_an_empty_object() {
        let request = RequestEnvelope::parse(br#"{"principal":"a","tool":"t"}"#)
            .expect("parse invocation");
        let DaemonRequest::Invoke { arguments, .. } = request.body else {
            panic!("expected an invocation");
        };
        assert_eq!(arguments, empty_arguments());
    }

    #[test]
    fn parses_approval_decisions() {
        let request = RequestEnvelope::parse(
            br#"{"approval":{"id":3,"decision":"deny","reason":"no"}}"#,
        )
        .expect("parse approval");
        let DaemonRequest::Approval { approval } = request.body else {
            panic!("expected an approval");
        };
        assert_eq!(approval.id, ApprovalId::from_raw(3));
        assert_eq!(
            approval.decision,
            ApprovalDecision::Deny {
                reason: "no".to_owned()
            }
        );
    }

    #[test]
    fn parses_admin_actions() {
        let request = RequestEnvelope::parse(br#"{"admin":{"action":"cancel_approval","id":9}}"#)
            .expect("parse admin");
        assert!(matches!(
            request.body,
            DaemonRequest::Admin {
                admin: AdminCommand::CancelApproval { .. }
            }
        ));
    }

    #[test]
    fn rejects_empty_and_unknown_lines() {
        let empty = RequestEnvelope::parse(b"  \n").expect_err("empty line");
        assert!(empty.to_string().contains("empty request line"));
        let unknown = RequestEnvelope::parse(br#"{"hello":"world"}"#).expect_err("unknown shape");
        assert_eq!(unknown.kind(), "malformed_request");
    }

    #[test]
    fn reads_lines_until_eof() {
        let mut input = Cursor::new(b"one\ntwo".to_vec());
        assert_eq!(read_request_line(&mut input, 64).unwrap(), Some(b"one\n".to_vec()));
        assert_eq!(read_request_line(&mut input, 64).unwrap(), Some(b"two".to_vec()));
        assert_eq!(read_request_line(&mut input, 64).unwrap(), None);
    }

    #[test]
    fn oversized_lines_are_skipped_whole() {
        let mut input = Cursor::new(b"0123456789\nok\n".to_vec());
        let error = read_request_line(&mut input, 4).expect_err("too large");
        assert!(matches!(
            error,
            DispatchError::RequestTooLarge {
                size: 11,
                max_size: 4
            }
        ));
        assert_eq!(read_request_line(&mut input, 4).unwrap(), Some(b"ok\n".to_vec()));
    }
}
