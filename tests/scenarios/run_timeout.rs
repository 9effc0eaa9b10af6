//! Test: the whole-run time limit

use crate::helpers::*;
use cirun::{ErrorKind, Pipeline, RunCoordinator, Verdict};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_run_timeout_aborts_current_step() {
    let mut pipeline = Pipeline::from_steps(
        "slow",
        vec![step("build", "make"), step("test", "make test"), always_run("logs", "cat *.log")],
    );
    pipeline.run_timeout = Some(Duration::from_secs(1));

    let runner = MockRunner::new(vec![("build", Scripted::Hang)]);
    let provisioner = CountingProvisioner::default();
    let coordinator = RunCoordinator::new(provisioner.clone(), runner.clone());

    let start = Instant::now();
    let run = run_pipeline(&coordinator, &pipeline).await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::Timeout));
    assert_step_failed(&run, "build", ErrorKind::Timeout);
    assert_eq!(runner.executed(), vec!["build", "logs"]);
    assert_eq!(provisioner.teardowns(), 1);
    assert_eq!(run.exit_code(), Some(124));
}

#[tokio::test]
async fn test_run_within_limit_succeeds() {
    let mut pipeline = Pipeline::from_steps("quick", vec![step("build", "make")]);
    pipeline.run_timeout = Some(Duration::from_secs(30));

    let coordinator = RunCoordinator::new(CountingProvisioner::default(), MockRunner::default());
    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Success, None);
}
