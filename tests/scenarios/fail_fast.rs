//! Test: a failing required step stops the run
//!
//! Scenario:
//! 1. build -> succeeds
//! 2. test -> exits 2
//! 3. deploy -> never attempted
//!
//! Expected: Failure with StepFailure naming "test"

use crate::helpers::*;
use cirun::{ErrorKind, Pipeline, RunCoordinator, Verdict};

#[tokio::test]
async fn test_first_failure_stops_later_steps() {
    let pipeline = Pipeline::from_steps(
        "fail-fast",
        vec![step("build", "make"), step("test", "make test"), step("deploy", "make deploy")],
    );
    let runner = MockRunner::new(vec![("test", Scripted::Fail(2))]);
    let events = EventLog::default();
    let coordinator = RunCoordinator::new(CountingProvisioner::default(), runner.clone())
        .with_event_handler(events.handler());

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::StepFailure));
    assert_executed_order(&run, &["build", "test"]);
    assert_eq!(runner.executed(), vec!["build", "test"]);
    assert_eq!(events.skipped(), vec!["deploy"]);

    let failure = run.failure().unwrap();
    assert_eq!(failure.step.as_deref(), Some("test"));
    assert_eq!(run.result("test").unwrap().exit_code, Some(2));
    assert_eq!(run.exit_code(), Some(1));
}

#[tokio::test]
async fn test_all_steps_succeed_in_order() {
    let pipeline = Pipeline::from_steps(
        "green",
        vec![step("lint", "true"), step("build", "true"), step("test", "true")],
    );
    let runner = MockRunner::new(vec![("build", Scripted::Succeed("built\n".to_string()))]);
    let coordinator = RunCoordinator::new(CountingProvisioner::default(), runner);

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Success, None);
    assert_executed_order(&run, &["lint", "build", "test"]);
    assert_eq!(run.result("build").unwrap().output, "built\n");
    assert_eq!(run.exit_code(), Some(0));
    assert!(run.started_at().unwrap() <= run.completed_at().unwrap());
}

#[tokio::test]
async fn test_empty_pipeline_succeeds() {
    let pipeline = Pipeline::from_steps("empty", Vec::new());
    let provisioner = CountingProvisioner::default();
    let coordinator = RunCoordinator::new(provisioner.clone(), MockRunner::default());

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Success, None);
    assert!(run.results().is_empty());
    assert_eq!(provisioner.provisions(), 1);
    assert_eq!(provisioner.teardowns(), 1);
}
