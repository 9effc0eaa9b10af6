//! Test: every provisioned environment is torn down exactly once

use crate::helpers::*;
use cirun::{ErrorKind, ExecutionEvent, Pipeline, RunCoordinator, Verdict};

async fn run_and_count(pipeline: &Pipeline, runner: MockRunner) -> (cirun::Run, CountingProvisioner, EventLog) {
    let provisioner = CountingProvisioner::default();
    let events = EventLog::default();
    let coordinator = RunCoordinator::new(provisioner.clone(), runner).with_event_handler(events.handler());
    let run = run_pipeline(&coordinator, pipeline).await;
    (run, provisioner, events)
}

#[tokio::test]
async fn test_teardown_after_success() {
    let pipeline = Pipeline::from_steps("ok", vec![step("build", "make")]);
    let (run, provisioner, events) = run_and_count(&pipeline, MockRunner::default()).await;

    assert_verdict(&run, Verdict::Success, None);
    assert_eq!(provisioner.teardowns(), 1);
    assert_eq!(events.teardowns(), 1);
}

#[tokio::test]
async fn test_teardown_after_step_failure() {
    let pipeline = Pipeline::from_steps("broken", vec![step("build", "make"), step("test", "make test")]);
    let runner = MockRunner::new(vec![("build", Scripted::Fail(2))]);
    let (run, provisioner, events) = run_and_count(&pipeline, runner).await;

    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::StepFailure));
    assert_eq!(provisioner.teardowns(), 1);
    assert_eq!(events.teardowns(), 1);
}

#[tokio::test]
async fn test_teardown_precedes_completion() {
    let pipeline = Pipeline::from_steps("ordered", vec![step("build", "make")]);
    let (_, _, events) = run_and_count(&pipeline, MockRunner::default()).await;

    let events = events.events();
    let torn_down = events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::EnvironmentTornDown { .. }))
        .unwrap();
    let completed = events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::RunCompleted { .. }))
        .unwrap();
    assert!(torn_down < completed);
    assert_eq!(completed, events.len() - 1);
}

#[tokio::test]
async fn test_no_teardown_when_provisioning_fails() {
    let pipeline = Pipeline::from_steps("no-env", vec![step("build", "make"), always_run("logs", "cat *.log")]);
    let provisioner = CountingProvisioner::failing();
    let runner = MockRunner::default();
    let events = EventLog::default();
    let coordinator =
        RunCoordinator::new(provisioner.clone(), runner.clone()).with_event_handler(events.handler());

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::ProvisionError));
    assert!(run.results().is_empty());
    assert!(runner.executed().is_empty());
    assert_eq!(provisioner.provisions(), 1);
    assert_eq!(provisioner.teardowns(), 0);
    assert_eq!(events.teardowns(), 0);
    assert!(run.failure().unwrap().message.contains("python3"));
    assert_eq!(run.exit_code(), Some(3));
}
