//! Test: always-run steps survive an earlier failure
//!
//! Scenario:
//! 1. test -> fails
//! 2. package -> skipped
//! 3. collect-logs (always_run) -> runs, and its own failure does not matter
//!
//! Expected: Failure attributed to "test", collect-logs still attempted

use crate::helpers::*;
use cirun::{ErrorKind, Pipeline, RunCoordinator, Verdict};

#[tokio::test]
async fn test_always_run_step_runs_after_failure() {
    let pipeline = Pipeline::from_steps(
        "cleanup",
        vec![
            step("test", "pytest"),
            step("package", "make dist"),
            always_run("collect-logs", "cat *.log"),
        ],
    );
    let runner = MockRunner::new(vec![("test", Scripted::Fail(1))]);
    let events = EventLog::default();
    let coordinator = RunCoordinator::new(CountingProvisioner::default(), runner.clone())
        .with_event_handler(events.handler());

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::StepFailure));
    assert_executed_order(&run, &["test", "collect-logs"]);
    assert_eq!(events.skipped(), vec!["package"]);
    assert!(run.result("collect-logs").unwrap().is_success());
    assert_eq!(run.failure().unwrap().step.as_deref(), Some("test"));
}

#[tokio::test]
async fn test_failing_always_run_step_does_not_fail_run() {
    let pipeline = Pipeline::from_steps(
        "flaky-cleanup",
        vec![
            step("build", "make"),
            always_run("cleanup", "rm -rf build"),
            step("test", "make test"),
        ],
    );
    let runner = MockRunner::new(vec![("cleanup", Scripted::Fail(1))]);
    let coordinator = RunCoordinator::new(CountingProvisioner::default(), runner);

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Success, None);
    assert_executed_order(&run, &["build", "cleanup", "test"]);
    assert_step_failed(&run, "cleanup", ErrorKind::StepFailure);
}

#[tokio::test]
async fn test_every_always_run_step_runs_after_failure() {
    let pipeline = Pipeline::from_steps(
        "reports",
        vec![
            step("test", "pytest"),
            always_run("coverage", "coverage xml"),
            step("publish", "twine upload"),
            always_run("logs", "cat *.log"),
        ],
    );
    let runner = MockRunner::new(vec![("test", Scripted::Fail(1)), ("coverage", Scripted::Fail(1))]);
    let coordinator = RunCoordinator::new(CountingProvisioner::default(), runner);

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::StepFailure));
    assert_executed_order(&run, &["test", "coverage", "logs"]);
    assert!(run.result("publish").is_none());
}
