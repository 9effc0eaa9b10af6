//! Test: cancelling a run in flight
//!
//! Scenario:
//! 1. build -> hangs until cancelled
//! 2. deploy -> skipped
//! 3. cleanup (always_run) -> still runs
//!
//! Expected: Failure with Cancelled, environment torn down once

use crate::helpers::*;
use cirun::{ErrorKind, ExecutionEvent, Pipeline, RunCoordinator, TriggerEvent, Verdict};
use std::time::Duration;

#[tokio::test]
async fn test_cancel_running_step() {
    let pipeline = Pipeline::from_steps(
        "cancel-me",
        vec![step("build", "make"), step("deploy", "make deploy"), always_run("cleanup", "make clean")],
    );
    let runner = MockRunner::new(vec![("build", Scripted::Hang)]);
    let provisioner = CountingProvisioner::default();
    let events = EventLog::default();
    let coordinator = RunCoordinator::new(provisioner.clone(), runner.clone())
        .with_event_handler(events.handler());

    let handle = coordinator.trigger(&pipeline, TriggerEvent::manual());
    tokio::time::timeout(Duration::from_secs(5), async {
        while runner.executed().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("build should start");

    assert_eq!(handle.verdict(), Verdict::Running);
    assert!(handle.cancel());
    assert!(!handle.cancel(), "second cancel is a no-op");

    let run = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancelled run should finish promptly")
        .unwrap();

    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::Cancelled));
    assert_step_failed(&run, "build", ErrorKind::Cancelled);
    assert_eq!(runner.executed(), vec!["build", "cleanup"]);
    assert!(run.result("cleanup").unwrap().is_success());
    assert_eq!(events.skipped(), vec!["deploy"]);
    assert_eq!(provisioner.teardowns(), 1);
    assert_eq!(run.exit_code(), Some(130));

    assert!(events
        .events()
        .iter()
        .any(|event| matches!(event, ExecutionEvent::RunAborted { .. })));
}

#[tokio::test]
async fn test_cancel_before_steps_start() {
    let pipeline = Pipeline::from_steps("early", vec![step("build", "make"), step("test", "make test")]);
    let runner = MockRunner::default();
    let provisioner = CountingProvisioner::default();
    let coordinator = RunCoordinator::new(provisioner.clone(), runner.clone());

    let handle = coordinator.trigger(&pipeline, TriggerEvent::manual());
    handle.cancel();
    let run = handle.wait().await.unwrap();

    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::Cancelled));
    assert!(runner.executed().is_empty());
    assert_eq!(provisioner.provisions(), provisioner.teardowns());
}
