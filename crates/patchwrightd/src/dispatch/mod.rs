//! JSONL request loop in front of the tool registry.
//!
//! Requests arrive one per line and are answered one per line, in order.
//! Malformed or oversized lines are answered with an error and the loop
//! carries on; only I/O failures on the streams end it early.

mod errors;
mod request;
mod response;

use std::io::{BufRead, Write};

use tracing::{debug, warn};

pub use errors::DispatchError;
pub use request::{AdminCommand, ApprovalReply, DaemonRequest, RequestEnvelope, read_request_line};
pub use response::{AdminReply, DaemonResponse, ResponseBody, ResponseWriter};

use crate::registry::ToolRegistry;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Maximum size of a single request line in bytes.
pub const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

/// Serves requests from `input` until end of input.
///
/// Returns the number of request lines answered.
///
/// # Errors
///
/// Fails when reading `input` or writing `output` fails.
pub fn serve<R, W>(registry: &ToolRegistry, mut input: R, output: W) -> Result<usize, DispatchError>
where
    R: BufRead,
    W: Write,
{
    let mut writer = ResponseWriter::new(output);
    let mut answered = 0;
    loop {
        let line = match read_request_line(&mut input, MAX_REQUEST_BYTES) {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(error) if error.is_recoverable() => {
                warn!(target: DISPATCH_TARGET, %error, "rejected request line");
                writer.write_response(&DaemonResponse {
                    id: None,
                    body: ResponseBody::Error(error.envelope()),
                })?;
                answered += 1;
                continue;
            }
            Err(error) => return Err(error),
        };
        if line.trim_ascii().is_empty() {
            continue;
        }
        let response = match RequestEnvelope::parse(&line) {
            Ok(request) => handle(registry, request),
            Err(error) => {
                warn!(target: DISPATCH_TARGET, %error, "malformed request");
                DaemonResponse {
                    id: None,
                    body: ResponseBody::Error(error.envelope()),
                }
            }
        };
        writer.write_response(&response)?;
        answered += 1;
    }
    debug!(target: DISPATCH_TARGET, answered, "input closed");
    Ok(answered)
}

/// Answers one parsed request.
pub fn handle(registry: &ToolRegistry, request: RequestEnvelope) -> DaemonResponse {
    let body = match request.body {
        DaemonRequest::Invoke {
            principal,
            tool,
            arguments,
        } => outcome(registry.invoke(&principal, &tool, arguments)),
        DaemonRequest::Approval { approval } => {
            outcome(registry.resolve_approval(approval.id, approval.decision))
        }
        DaemonRequest::Admin { admin } => administer(registry, admin),
    };
    DaemonResponse {
        id: request.id,
        body,
    }
}

fn outcome(
    result: Result<crate::registry::ToolOutcome, crate::registry::ToolError>,
) -> ResponseBody {
    match result {
        Ok(outcome) => ResponseBody::Outcome(outcome),
        Err(error) => ResponseBody::Error(error.envelope()),
    }
}

fn administer(registry: &ToolRegistry, command: AdminCommand) -> ResponseBody {
    let reply = match command {
        AdminCommand::ListApprovals => AdminReply::Approvals {
            approvals: registry.pending_approvals(),
        },
        AdminCommand::CancelApproval { id } => AdminReply::Cancelled {
            id,
            cancelled: registry.cancel_approval(id),
        },
        AdminCommand::SetRules { rules } => match registry.update_permission_rules(rules) {
            Ok(count) => AdminReply::RulesReplaced { count },
            Err(error) => return ResponseBody::Error(error.envelope()),
        },
    };
    ResponseBody::Admin(reply)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use patchwright_config::Config;
    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;

    fn run(dir: &TempDir, input: &str) -> Vec<Value> {
        run_with(
            dir,
            input,
            Config {
                sandbox_keep_privileges: true,
                allow_rule_updates: true,
                ..Config::default()
            },
        )
    }

    fn run_with(dir: &TempDir, input: &str, config: Config) -> Vec<Value> {
        let registry = ToolRegistry::new(config, dir.path()).expect("registry");
        let mut output = Vec::new();
        serve(&registry, input.as_bytes(), &mut output).expect("serve");
        String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect()
    }

    #[test]
    fn answers_each_line_in_order() {
        let dir = TempDir::new().expect("temp dir");
        let input = concat!(
            r#"{"id":1,"principal":"p","tool":"write_file","arguments":{"path":"a.txt","content":"hi"}}"#,
            "\n",
            "not json\n",
            "\n",
            r#"{"id":2,"principal":"p","tool":"nope"}"#,
            "\n",
        );
        let responses = run(&dir, input);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["status"], "completed");
        assert_eq!(responses[0]["output"]["tool"], "write_file");
        assert_eq!(responses[1]["kind"], "malformed_request");
        assert_eq!(responses[2]["id"], 2);
        assert_eq!(responses[2]["kind"], "unknown_tool");
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).expect("read"), "hi");
    }

    #[test]
    fn approvals_round_trip_through_the_loop() {
        let dir = TempDir::new().expect("temp dir");
        let input = concat!(
            r#"{"admin":{"action":"set_rules","rules":[{"principal":"*","tool":"write_file","resource":"*","decision":"require_confirmation"}]}}"#,
            "\n",
            r#"{"principal":"p","tool":"write_file","arguments":{"path":"b.txt","content":"ok"}}"#,
            "\n",
            r#"{"admin":{"action":"list_approvals"}}"#,
            "\n",
            r#"{"approval":{"id":1,"decision":"approve"}}"#,
            "\n",
        );
        let responses = run(&dir, input);
        assert_eq!(responses[0]["status"], "rules_replaced");
        assert_eq!(responses[1]["status"], "awaiting_approval");
        assert_eq!(responses[1]["approval"]["id"], 1);
        assert_eq!(responses[2]["approvals"][0]["tool"], "write_file");
        assert_eq!(responses[3]["status"], "completed");
        assert_eq!(fs::read_to_string(dir.path().join("b.txt")).expect("read"), "ok");
    }

    #[test]
    fn rule_updates_are_refused_unless_enabled() {
        let dir = TempDir::new().expect("temp dir");
        let input = concat!(
            r#"{"id":1,"admin":{"action":"set_rules","rules":[{"principal":"*","tool":"*","resource":"*","decision":"allow"}]}}"#,
            "\n",
        );
        let config = Config {
            sandbox_keep_privileges: true,
            ..Config::default()
        };
        let responses = run_with(&dir, input, config);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["status"], "error");
        assert_eq!(responses[0]["kind"], "permission_denied");
    }
}
