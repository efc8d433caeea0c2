//! Tests for transactional file mutation.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

/// Temporary workspace with a manager and helpers for seeding files.
struct Workspace {
    dir: TempDir,
    manager: TransactionManager,
}

impl Workspace {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn seed(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, content).expect("seed file");
        path
    }

    fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path(name)).expect("read file")
    }
}

#[fixture]
fn workspace() -> Workspace {
    Workspace {
        dir: TempDir::new().expect("create temp dir"),
        manager: TransactionManager::default(),
    }
}

#[rstest]
fn new_transactions_start_pending(workspace: Workspace) {
    let id = workspace.manager.begin();
    assert_eq!(workspace.manager.state(id).unwrap(), TransactionState::Pending);
    assert_ne!(workspace.manager.begin(), id);
}

#[rstest]
fn write_then_commit_keeps_changes(workspace: Workspace) {
    let path = workspace.seed("a.txt", "before\n");
    let manager = &workspace.manager;
    let id = manager.begin();

    let change = manager.apply(id, &Operation::write(&path, "after\n")).unwrap();
    assert_eq!(change.before.as_deref(), Some(b"before\n".as_slice()));
    assert_eq!(manager.state(id).unwrap(), TransactionState::Applying);

    manager.commit(id).unwrap();
    manager.commit(id).expect("commit is idempotent");
    assert_eq!(workspace.read("a.txt"), "after\n");
    assert_eq!(manager.state(id).unwrap(), TransactionState::Committed);
}

#[rstest]
fn rollback_restores_every_kind_of_change(workspace: Workspace) {
    let written = workspace.seed("written.txt", "original\n");
    let deleted = workspace.seed("deleted.txt", "keep me\n");
    let patched = workspace.seed("patched.txt", "a\nb\nc\n");
    let created = workspace.path("nested/dir/created.txt");
    let manager = &workspace.manager;
    let diff = DiffEngine::default().create_diff("a\nb\nc\n", "a\nB\nc\n", "patched.txt");

    let id = manager.begin();
    manager.apply(id, &Operation::write(&written, "changed\n")).unwrap();
    manager.apply(id, &Operation::delete(&deleted)).unwrap();
    manager.apply(id, &Operation::apply_diff(&patched, diff)).unwrap();
    manager.apply(id, &Operation::write(&created, "fresh\n")).unwrap();
    assert_eq!(workspace.read("patched.txt"), "a\nB\nc\n");

    manager.rollback(id).unwrap();

    assert_eq!(workspace.read("written.txt"), "original\n");
    assert_eq!(workspace.read("deleted.txt"), "keep me\n");
    assert_eq!(workspace.read("patched.txt"), "a\nb\nc\n");
    assert!(!created.exists());
    assert!(!workspace.path("nested").exists(), "created directories are removed");
    assert_eq!(manager.state(id).unwrap(), TransactionState::RolledBack);
}

#[rstest]
fn first_touch_snapshot_wins(workspace: Workspace) {
    let path = workspace.seed("a.txt", "v0\n");
    let manager = &workspace.manager;
    let id = manager.begin();

    manager.apply(id, &Operation::write(&path, "v1\n")).unwrap();
    manager.apply(id, &Operation::write(&path, "v2\n")).unwrap();
    assert_eq!(manager.staged_paths(id).unwrap(), vec![path.clone()]);
    assert_eq!(manager.operation_log(id).unwrap().len(), 2);

    manager.rollback(id).unwrap();
    assert_eq!(workspace.read("a.txt"), "v0\n");
}

#[rstest]
fn staging_order_is_preserved(workspace: Workspace) {
    let first = workspace.seed("first.txt", "1");
    let second = workspace.seed("second.txt", "2");
    let manager = &workspace.manager;
    let id = manager.begin();

    manager.stage(id, &second).unwrap();
    manager.stage(id, &first).unwrap();
    manager.stage(id, &second).unwrap();

    assert_eq!(manager.staged_paths(id).unwrap(), vec![second, first]);
}

#[rstest]
fn failed_diff_leaves_the_file_untouched(workspace: Workspace) {
    let path = workspace.seed("a.txt", "x\ny\n");
    let manager = &workspace.manager;
    let diff = DiffEngine::default().create_diff("a\nb\n", "a\nc\n", "a.txt");
    let id = manager.begin();

    let error = manager
        .apply(id, &Operation::apply_diff(&path, diff))
        .expect_err("diff must not apply");

    assert!(matches!(error, TransactionError::Diff { .. }));
    assert!(error.reason().starts_with("context mismatch at line 1"));
    assert_eq!(workspace.read("a.txt"), "x\ny\n");
}

#[rstest]
fn terminal_transactions_reject_operations(workspace: Workspace) {
    let path = workspace.path("a.txt");
    let manager = &workspace.manager;
    let id = manager.begin();
    manager.rollback(id).unwrap();

    let error = manager
        .apply(id, &Operation::write(&path, "late"))
        .expect_err("rolled back transaction is closed");
    assert!(matches!(
        error,
        TransactionError::Terminal {
            state: TransactionState::RolledBack,
            ..
        }
    ));
    assert!(!path.exists());
    assert!(manager.commit(id).is_err());
    manager.rollback(id).expect("rollback is idempotent");
}

#[rstest]
fn committed_transactions_cannot_roll_back(workspace: Workspace) {
    let manager = &workspace.manager;
    let id = manager.begin();
    manager.commit(id).unwrap();

    assert!(matches!(
        manager.rollback(id),
        Err(TransactionError::Terminal {
            state: TransactionState::Committed,
            ..
        })
    ));
}

#[rstest]
fn unrestorable_paths_are_reported(workspace: Workspace) {
    let broken = workspace.seed("broken.txt", "original");
    let healthy = workspace.seed("healthy.txt", "original");
    let manager = &workspace.manager;
    let id = manager.begin();
    manager.apply(id, &Operation::write(&broken, "changed")).unwrap();
    manager.apply(id, &Operation::write(&healthy, "changed")).unwrap();

    // A directory in place of the file cannot be overwritten by a rename.
    fs::remove_file(&broken).unwrap();
    fs::create_dir(&broken).unwrap();
    fs::write(broken.join("inner"), "blocker").unwrap();

    match manager.rollback(id) {
        Err(TransactionError::Integrity { paths, .. }) => assert_eq!(paths, vec![broken]),
        other => panic!("expected integrity error, got {other:?}"),
    }
    assert_eq!(workspace.read("healthy.txt"), "original");
}

#[rstest]
fn writes_preserve_permissions(workspace: Workspace) {
    let path = workspace.seed("script.sh", "#!/bin/sh\n");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o754)).unwrap();
    let id = workspace.manager.begin();

    workspace
        .manager
        .apply(id, &Operation::write(&path, "#!/bin/sh\nexit 0\n"))
        .unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o754);
}

#[rstest]
fn unknown_transactions_are_rejected(workspace: Workspace) {
    let manager = &workspace.manager;
    let id = manager.begin();
    manager.commit(id).unwrap();
    manager.release(id);

    assert!(matches!(
        manager.state(id),
        Err(TransactionError::UnknownTransaction { .. })
    ));
}

#[rstest]
fn abort_all_rolls_back_open_transactions(workspace: Workspace) {
    let path = workspace.seed("a.txt", "original");
    let manager = &workspace.manager;
    let open = manager.begin();
    let done = manager.begin();
    manager.apply(open, &Operation::write(&path, "changed")).unwrap();
    manager.commit(done).unwrap();

    assert!(manager.abort_all().is_empty());
    assert_eq!(workspace.read("a.txt"), "original");
    assert_eq!(manager.state(open).unwrap(), TransactionState::RolledBack);
    assert_eq!(manager.state(done).unwrap(), TransactionState::Committed);
}
