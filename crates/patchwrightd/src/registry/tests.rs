//! Dispatch-level tests for the tool registry.

use std::fs;
use std::os::unix::fs::MetadataExt;

use ortho_config::OrthoConfig;
use patchwright_config::{Config, PermissionDefault};
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::admission::{PermissionRule, Selector};

struct Harness {
    dir: TempDir,
    registry: ToolRegistry,
}

impl Harness {
    fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let registry = ToolRegistry::new(config, dir.path()).expect("registry");
        Self { dir, registry }
    }

    /// Harness whose workspace carries an ignore file from the start.
    fn with_ignore_file(patterns: &str) -> Self {
        let config = test_config();
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join(&config.ignore_file), patterns).expect("ignore file");
        let registry = ToolRegistry::new(config, dir.path()).expect("registry");
        Self { dir, registry }
    }

    fn seed(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("seed file");
    }

    fn read(&self, name: &str) -> String {
        fs::read_to_string(self.dir.path().join(name)).expect("read file")
    }

    fn exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    fn invoke(&self, tool: &str, arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        self.registry.invoke("tester", tool, arguments)
    }

    fn output(&self, tool: &str, arguments: serde_json::Value) -> ToolOutput {
        match self.invoke(tool, arguments).expect("invocation succeeds") {
            ToolOutcome::Completed { output } => output,
            ToolOutcome::AwaitingApproval { .. } => panic!("unexpected approval"),
        }
    }
}

fn test_config() -> Config {
    Config {
        sandbox_keep_privileges: true,
        rate_capacity: 100,
        ..Config::default()
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::with_config(test_config())
}

#[rstest]
fn edit_file_replaces_one_line(harness: Harness) {
    harness.seed("notes.txt", "a\nb\nc\n");
    let output = harness.output(
        "edit_file",
        json!({"path": "notes.txt", "start_line": 2, "end_line": 2, "new_content": "X"}),
    );
    assert_eq!(harness.read("notes.txt"), "a\nX\nc\n");
    let ToolOutput::EditFile(change) = output else {
        panic!("wrong output");
    };
    assert_eq!(change.path, "notes.txt");
    assert_eq!(change.old_content, "a\nb\nc\n");
    assert_eq!(change.new_content, "a\nX\nc\n");
}

#[test]
fn a_loaded_configuration_keeps_the_safety_defaults() {
    let loaded = Config::load_from_iter(["patchwrightd"]).expect("configuration loads");
    assert!(loaded.one_based_lines());
    assert!(loaded.block_dangerous_commands());
    assert!(sandbox_policy(&loaded).drop_privileges());

    let harness = Harness::with_config(Config {
        rate_capacity: 100,
        ..loaded
    });
    harness.seed("notes.txt", "a\nb\nc\n");
    harness.output(
        "edit_file",
        json!({"path": "notes.txt", "start_line": 2, "end_line": 2, "new_content": "X"}),
    );
    assert_eq!(harness.read("notes.txt"), "a\nX\nc\n");

    let error = harness
        .invoke("execute_command", json!({"program": "rm", "args": ["notes.txt"]}))
        .expect_err("destructive programs stay blocked");
    assert_eq!(error.kind(), "permission_denied");
    assert!(harness.exists("notes.txt"));
}

#[rstest]
#[case(1, 3, "", "")]
#[case(1, 2, "first\nsecond\n", "first\nsecond\nc\n")]
#[case(3, 3, "end", "a\nb\nend\n")]
fn edit_file_ranges(
    harness: Harness,
    #[case] start: i64,
    #[case] end: i64,
    #[case] content: &str,
    #[case] expected: &str,
) {
    harness.seed("f.txt", "a\nb\nc\n");
    harness.output(
        "edit_file",
        json!({"path": "f.txt", "start_line": start, "end_line": end, "new_content": content}),
    );
    assert_eq!(harness.read("f.txt"), expected);
}

#[rstest]
#[case(0, 1)]
#[case(2, 1)]
#[case(3, 4)]
fn edit_file_rejects_bad_ranges_without_writing(
    harness: Harness,
    #[case] start: i64,
    #[case] end: i64,
) {
    harness.seed("f.txt", "a\nb\nc\n");
    let error = harness
        .invoke(
            "edit_file",
            json!({"path": "f.txt", "start_line": start, "end_line": end, "new_content": "X"}),
        )
        .expect_err("range must be rejected");
    assert_eq!(error.kind(), "validation_error");
    assert_eq!(harness.read("f.txt"), "a\nb\nc\n");
}

#[rstest]
fn edit_file_requires_an_existing_file(harness: Harness) {
    let error = harness
        .invoke(
            "edit_file",
            json!({"path": "missing.txt", "start_line": 1, "end_line": 1, "new_content": "X"}),
        )
        .expect_err("missing file");
    assert!(error.to_string().contains("file does not exist"));
}

#[rstest]
fn write_file_creates_nested_files(harness: Harness) {
    let output = harness.output(
        "write_file",
        json!({"path": "deep/dir/new.txt", "content": "hello\n"}),
    );
    assert_eq!(harness.read("deep/dir/new.txt"), "hello\n");
    let ToolOutput::WriteFile(change) = output else {
        panic!("wrong output");
    };
    assert_eq!(change.old_content, "");
}

#[rstest]
fn write_file_respects_overwrite(harness: Harness) {
    harness.seed("keep.txt", "original");
    let error = harness
        .invoke("write_file", json!({"path": "keep.txt", "content": "new"}))
        .expect_err("overwrite is false");
    assert_eq!(error.kind(), "validation_error");
    assert_eq!(harness.read("keep.txt"), "original");

    harness.output(
        "write_file",
        json!({"path": "keep.txt", "content": "new", "overwrite": true}),
    );
    assert_eq!(harness.read("keep.txt"), "new");
}

#[rstest]
#[case("../escape.txt")]
#[case("/tmp/escape.txt")]
fn paths_outside_the_workspace_are_rejected(harness: Harness, #[case] path: &str) {
    let error = harness
        .invoke("write_file", json!({"path": path, "content": "x"}))
        .expect_err("path must be confined");
    assert_eq!(error.kind(), "validation_error");
}

#[rstest]
fn multi_apply_diff_commits_every_file(harness: Harness) {
    harness.seed("one.txt", "alpha\nbeta\n");
    harness.seed("two.txt", "gamma\ndelta\n");
    let output = harness.output(
        "multi_apply_diff",
        json!({"operations": [
            {"path": "one.txt", "diff": "--- a/one.txt\n+++ b/one.txt\n@@ -1,2 +1,2 @@\n alpha\n-beta\n+BETA\n"},
            {"path": "two.txt", "diff": "--- a/two.txt\n+++ b/two.txt\n@@ -1,2 +1,2 @@\n-gamma\n+GAMMA\n delta\n"},
        ]}),
    );
    assert_eq!(harness.read("one.txt"), "alpha\nBETA\n");
    assert_eq!(harness.read("two.txt"), "GAMMA\ndelta\n");
    let ToolOutput::MultiApplyDiff(batch) = output else {
        panic!("wrong output");
    };
    let paths: Vec<&str> = batch.changes.iter().map(|change| change.path.as_str()).collect();
    assert_eq!(paths, ["one.txt", "two.txt"]);
    assert!(batch.transaction.starts_with("tx-"));
}

#[rstest]
fn multi_apply_diff_rejects_unparseable_diffs_before_writing(harness: Harness) {
    harness.seed("one.txt", "alpha\n");
    let error = harness
        .invoke(
            "multi_apply_diff",
            json!({"operations": [
                {"path": "one.txt", "diff": "--- a/one.txt\n+++ b/one.txt\n@@ -1 +1 @@\n-alpha\n+ALPHA\n"},
                {"path": "two.txt", "diff": "@@ nonsense @@\n"},
            ]}),
        )
        .expect_err("parse failure");
    assert_eq!(error.kind(), "parse_error");
    assert_eq!(harness.read("one.txt"), "alpha\n");
}

#[rstest]
fn failed_batches_report_rollback_in_the_envelope(harness: Harness) {
    harness.seed("one.txt", "alpha\n");
    harness.seed("two.txt", "gamma\n");
    let error = harness
        .invoke(
            "multi_apply_diff",
            json!({"operations": [
                {"path": "one.txt", "diff": "--- a/one.txt\n+++ b/one.txt\n@@ -1 +1 @@\n-alpha\n+ALPHA\n"},
                {"path": "two.txt", "diff": "--- a/two.txt\n+++ b/two.txt\n@@ -1 +1 @@\n-stale\n+GAMMA\n"},
            ]}),
        )
        .expect_err("stale diff");
    assert_eq!(harness.read("one.txt"), "alpha\n");
    assert_eq!(harness.read("two.txt"), "gamma\n");

    let envelope = serde_json::to_value(error.envelope()).expect("serialise envelope");
    assert_eq!(envelope["status"], "error");
    assert_eq!(envelope["kind"], "batch_failed");
    assert_eq!(envelope["details"]["failed_file"], "two.txt");
    assert_eq!(envelope["details"]["rollback"]["status"], "restored");
}

#[rstest]
fn search_and_replace_walks_directories_in_order(harness: Harness) {
    harness.seed("src/b.rs", "let old = 1;\n");
    harness.seed("src/a.rs", "old(); old();\n");
    harness.seed("src/c.rs", "untouched\n");
    let inode_before = fs::metadata(harness.dir.path().join("src/c.rs"))
        .expect("metadata")
        .ino();

    let output = harness.output(
        "search_and_replace",
        json!({"path": "src", "pattern": "old", "replacement": "new"}),
    );
    let ToolOutput::SearchAndReplace(changes) = output else {
        panic!("wrong output");
    };
    let paths: Vec<&str> = changes.iter().map(|change| change.path.as_str()).collect();
    assert_eq!(paths, ["src/a.rs", "src/b.rs"]);
    assert_eq!(harness.read("src/a.rs"), "new(); new();\n");
    assert_eq!(harness.read("src/b.rs"), "let new = 1;\n");

    let inode_after = fs::metadata(harness.dir.path().join("src/c.rs"))
        .expect("metadata")
        .ino();
    assert_eq!(inode_before, inode_after, "unmatched file must not be rewritten");
}

#[rstest]
fn search_and_replace_with_regex_groups(harness: Harness) {
    harness.seed("names.txt", "Smith, John\nDoe, Jane\n");
    harness.output(
        "search_and_replace",
        json!({
            "path": "names.txt",
            "pattern": r"(?m)^(\w+), (\w+)$",
            "is_regex": true,
            "replacement": "$2 $1",
        }),
    );
    assert_eq!(harness.read("names.txt"), "John Smith\nJane Doe\n");
}

#[rstest]
fn edits_through_a_symlink_update_its_target(harness: Harness) {
    harness.seed("real.txt", "a\nb\n");
    std::os::unix::fs::symlink("real.txt", harness.dir.path().join("alias.txt")).expect("symlink");

    harness.output(
        "edit_file",
        json!({"path": "alias.txt", "start_line": 2, "end_line": 2, "new_content": "B"}),
    );
    assert_eq!(harness.read("real.txt"), "a\nB\n");
    let link = fs::symlink_metadata(harness.dir.path().join("alias.txt")).expect("metadata");
    assert!(link.file_type().is_symlink(), "the link itself must survive");
}

#[rstest]
fn edit_file_keeps_crlf_line_endings(harness: Harness) {
    harness.seed("dos.txt", "one\r\ntwo\r\nthree\r\n");
    harness.output(
        "edit_file",
        json!({"path": "dos.txt", "start_line": 2, "end_line": 2, "new_content": "TWO\nextra"}),
    );
    assert_eq!(harness.read("dos.txt"), "one\r\nTWO\r\nextra\r\nthree\r\n");
}

#[rstest]
fn write_file_keeps_the_overwritten_files_line_endings(harness: Harness) {
    harness.seed("dos.txt", "old\r\n");
    harness.output(
        "write_file",
        json!({"path": "dos.txt", "content": "a\nb\n", "overwrite": true}),
    );
    assert_eq!(harness.read("dos.txt"), "a\r\nb\r\n");

    harness.output("write_file", json!({"path": "fresh.txt", "content": "a\r\nb\n"}));
    assert_eq!(harness.read("fresh.txt"), "a\r\nb\n", "new files are written verbatim");
}

#[test]
fn ignored_paths_cannot_be_edited() {
    let harness = Harness::with_ignore_file("*.secret\nvendor/\n");
    harness.seed("api.secret", "token\n");

    for (tool, arguments) in [
        ("write_file", json!({"path": "api.secret", "content": "x", "overwrite": true})),
        ("write_file", json!({"path": "vendor/lib.rs", "content": "x"})),
        (
            "edit_file",
            json!({"path": "api.secret", "start_line": 1, "end_line": 1, "new_content": "x"}),
        ),
    ] {
        let error = harness.invoke(tool, arguments).expect_err("ignored path");
        assert_eq!(error.kind(), "validation_error", "{tool}");
        assert!(error.to_string().contains("ignore file"), "{error}");
    }
    assert_eq!(harness.read("api.secret"), "token\n");
    assert!(!harness.exists("vendor/lib.rs"));
}

#[test]
fn search_and_replace_skips_ignored_files() {
    let harness = Harness::with_ignore_file("generated/\n");
    harness.seed("src/lib.rs", "old\n");
    harness.seed("generated/out.rs", "old\n");

    let output = harness.output(
        "search_and_replace",
        json!({"path": ".", "pattern": "old", "replacement": "new"}),
    );
    let ToolOutput::SearchAndReplace(changes) = output else {
        panic!("wrong output");
    };
    let paths: Vec<&str> = changes.iter().map(|change| change.path.as_str()).collect();
    assert_eq!(paths, ["src/lib.rs"]);
    assert_eq!(harness.read("generated/out.rs"), "old\n");
}

#[rstest]
fn unknown_tools_are_rejected(harness: Harness) {
    let error = harness
        .invoke("delete_everything", json!({}))
        .expect_err("unknown tool");
    assert_eq!(error.kind(), "unknown_tool");
}

#[rstest]
fn denied_invocations_never_write(harness: Harness) {
    harness.registry.permissions().push_rule(PermissionRule::new(
        Selector::Exact("tester".to_owned()),
        Selector::Exact("write_file".to_owned()),
        Selector::Any,
        PermissionDefault::Deny,
    ));
    let error = harness
        .invoke("write_file", json!({"path": "x.txt", "content": "x"}))
        .expect_err("denied");
    assert_eq!(error.kind(), "permission_denied");
    assert!(!harness.exists("x.txt"));
}

#[rstest]
fn confirmation_parks_until_approved(harness: Harness) {
    harness.registry.permissions().push_rule(PermissionRule::new(
        Selector::Any,
        Selector::Any,
        Selector::Exact("filesystem".to_owned()),
        PermissionDefault::RequireConfirmation,
    ));
    let outcome = harness
        .invoke("write_file", json!({"path": "x.txt", "content": "x"}))
        .expect("parked");
    let ToolOutcome::AwaitingApproval { approval } = outcome else {
        panic!("expected an approval");
    };
    assert!(!harness.exists("x.txt"));
    let pending: Vec<ApprovalId> = harness
        .registry
        .pending_approvals()
        .iter()
        .map(|pending| pending.id)
        .collect();
    assert_eq!(pending, vec![approval.id]);

    let resumed = harness
        .registry
        .resolve_approval(approval.id, ApprovalDecision::Approve)
        .expect("approved invocation runs");
    assert!(resumed.output().is_some());
    assert_eq!(harness.read("x.txt"), "x");

    let error = harness
        .registry
        .resolve_approval(approval.id, ApprovalDecision::Approve)
        .expect_err("approval already consumed");
    assert_eq!(error.kind(), "unknown_approval");
}

#[rstest]
fn denied_approvals_report_the_reason(harness: Harness) {
    harness.registry.permissions().push_rule(PermissionRule::new(
        Selector::Any,
        Selector::Any,
        Selector::Any,
        PermissionDefault::RequireConfirmation,
    ));
    let ToolOutcome::AwaitingApproval { approval } = harness
        .invoke("write_file", json!({"path": "x.txt", "content": "x"}))
        .expect("parked")
    else {
        panic!("expected an approval");
    };
    let error = harness
        .registry
        .resolve_approval(
            approval.id,
            ApprovalDecision::Deny {
                reason: "not in this sprint".to_owned(),
            },
        )
        .expect_err("denied");
    assert_eq!(error.kind(), "permission_denied");
    assert!(error.to_string().contains("not in this sprint"));
    assert!(!harness.exists("x.txt"));
}

#[rstest]
fn rate_limits_apply_per_principal_and_tool() {
    let harness = Harness::with_config(Config {
        rate_capacity: 2,
        rate_refill_per_second: 0,
        ..test_config()
    });
    for index in 0..2 {
        harness.output(
            "write_file",
            json!({"path": format!("f{index}.txt"), "content": "x"}),
        );
    }
    let error = harness
        .invoke("write_file", json!({"path": "f2.txt", "content": "x"}))
        .expect_err("bucket empty");
    assert_eq!(error.kind(), "rate_limited");
    assert!(!harness.exists("f2.txt"));

    harness
        .registry
        .invoke("someone-else", "write_file", json!({"path": "f3.txt", "content": "x"}))
        .expect("other principals have their own bucket");
}

#[rstest]
fn dangerous_programs_are_blocked(harness: Harness) {
    harness.seed("precious.txt", "keep me");
    let error = harness
        .invoke("execute_command", json!({"program": "rm", "args": ["precious.txt"]}))
        .expect_err("blocked");
    assert_eq!(error.kind(), "permission_denied");
    assert!(harness.exists("precious.txt"));
}

#[cfg(target_os = "linux")]
#[rstest]
fn commands_run_in_the_workspace(harness: Harness) {
    harness.seed("sub/marker.txt", "");
    let output = harness.output(
        "execute_command",
        json!({"program": "ls", "cwd": "sub"}),
    );
    let ToolOutput::ExecuteCommand(report) = output else {
        panic!("wrong output");
    };
    assert!(report.succeeded());
    assert_eq!(report.stdout, "marker.txt\n");
}

#[rstest]
fn shutdown_refuses_new_work(harness: Harness) {
    harness.registry.shutdown();
    harness.registry.shutdown();
    let error = harness
        .invoke("write_file", json!({"path": "late.txt", "content": "x"}))
        .expect_err("shut down");
    assert_eq!(error.kind(), "shutting_down");
    assert!(!harness.exists("late.txt"));
}

#[test]
fn invalid_configuration_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let error = ToolRegistry::new(
        Config {
            max_concurrency: 0,
            ..Config::default()
        },
        dir.path(),
    )
    .expect_err("invalid config");
    assert_eq!(error.kind(), "configuration_error");
}
