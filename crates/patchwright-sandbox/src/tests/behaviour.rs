#![cfg(target_os = "linux")]
//! Behavioural tests for sandboxed execution using `rstest-bdd`.

use std::cell::RefCell;
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::{ExecutionReport, Sandbox, SandboxCommand, SandboxPolicy, Termination};

struct TestWorld {
    policy: SandboxPolicy,
    report: Option<ExecutionReport>,
}

impl TestWorld {
    fn report(&self) -> &ExecutionReport {
        self.report.as_ref().expect("command has not run")
    }
}

#[fixture]
fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld {
        policy: SandboxPolicy::new().with_grace_period(Duration::from_millis(500)),
        report: None,
    })
}

#[given("a sandbox with a {seconds} second timeout")]
fn given_timeout(world: &RefCell<TestWorld>, seconds: u64) {
    let mut world = world.borrow_mut();
    world.policy = world
        .policy
        .clone()
        .with_wall_timeout(Duration::from_secs(seconds));
}

#[given("the sandbox captures at most {bytes} bytes")]
fn given_capture_cap(world: &RefCell<TestWorld>, bytes: usize) {
    let mut world = world.borrow_mut();
    world.policy = world.policy.clone().with_max_output_bytes(bytes);
}

#[when("the sandbox runs {script}")]
fn when_runs(world: &RefCell<TestWorld>, script: String) {
    let mut world = world.borrow_mut();
    let command = SandboxCommand::new("sh")
        .arg("-c")
        .arg(script.trim_matches('"'));
    let report = Sandbox::new(world.policy.clone())
        .run(&command)
        .expect("sandboxed command should launch");
    world.report = Some(report);
}

#[then("the command exited with code {code}")]
fn then_exit_code(world: &RefCell<TestWorld>, code: i32) {
    let world = world.borrow();
    let report = world.report();
    assert_eq!(report.termination, Termination::Exited);
    assert_eq!(report.exit_code, Some(code));
}

#[then("the command timed out")]
fn then_timed_out(world: &RefCell<TestWorld>) {
    let world = world.borrow();
    let report = world.report();
    assert_eq!(report.termination, Termination::TimedOut);
    assert!(report.duration >= Duration::from_secs(2));
    assert!(report.duration < Duration::from_secs(10));
}

#[then("stdout is {text}")]
fn then_stdout_is(world: &RefCell<TestWorld>, text: String) {
    let world = world.borrow();
    assert_eq!(world.report().stdout.trim_end(), text.trim_matches('"'));
}

#[then("stderr is {text}")]
fn then_stderr_is(world: &RefCell<TestWorld>, text: String) {
    let world = world.borrow();
    assert_eq!(world.report().stderr.trim_end(), text.trim_matches('"'));
}

#[then("stdout holds {bytes} bytes")]
fn then_stdout_len(world: &RefCell<TestWorld>, bytes: usize) {
    let world = world.borrow();
    assert_eq!(world.report().stdout.len(), bytes);
}

#[then("the output is truncated")]
fn then_truncated(world: &RefCell<TestWorld>) {
    assert!(world.borrow().report().truncated);
}

#[then("the output is not truncated")]
fn then_not_truncated(world: &RefCell<TestWorld>) {
    assert!(!world.borrow().report().truncated);
}

#[scenario(
    path = "tests/features/sandbox.feature",
    name = "A successful command reports its output"
)]
fn successful_command(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/sandbox.feature",
    name = "A long running command is terminated at the timeout"
)]
fn timed_out_command(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/sandbox.feature",
    name = "A failing command reports its exit code"
)]
fn failing_command(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(
    path = "tests/features/sandbox.feature",
    name = "Oversized output is truncated"
)]
fn truncated_command(world: RefCell<TestWorld>) {
    let _ = world;
}
