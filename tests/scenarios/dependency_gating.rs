//! Test: steps whose capabilities are missing never reach the runner

use crate::helpers::*;
use cirun::{ErrorKind, Pipeline, RunCoordinator, Verdict};

#[tokio::test]
async fn test_missing_capability_fails_without_running() {
    let pipeline = Pipeline::from_steps(
        "pyboolnet",
        vec![
            requiring("install", &["python3"]),
            requiring("test", &["graphviz", "gringo"]),
            step("package", "make dist"),
        ],
    );
    let runner = MockRunner::default();
    let coordinator = RunCoordinator::new(
        CountingProvisioner::with_capabilities(&["python3", "graphviz"]),
        runner.clone(),
    );

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::DependencyUnmet));
    assert_step_failed(&run, "test", ErrorKind::DependencyUnmet);
    assert_eq!(runner.executed(), vec!["install"]);

    let result = run.result("test").unwrap();
    assert_eq!(result.exit_code, None);
    assert!(result.error_message().unwrap().contains("gringo"));
    assert!(!result.error_message().unwrap().contains("graphviz"));
    assert_eq!(run.exit_code(), Some(4));
}

#[tokio::test]
async fn test_versioned_capability_must_match_exactly() {
    let pipeline = Pipeline::from_steps("versions", vec![requiring("test", &["python3@3.12"])]);
    let coordinator = RunCoordinator::new(
        CountingProvisioner::with_capabilities(&["python3", "python3@3.11"]),
        MockRunner::default(),
    );

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Failure, Some(ErrorKind::DependencyUnmet));
}

#[tokio::test]
async fn test_satisfied_requirements_run_normally() {
    let pipeline = Pipeline::from_steps(
        "satisfied",
        vec![requiring("install", &["python3@3.11"]), requiring("test", &["clasp"])],
    );
    let coordinator = RunCoordinator::new(
        CountingProvisioner::with_capabilities(&["python3", "python3@3.11", "clasp"]),
        MockRunner::default(),
    );

    let run = run_pipeline(&coordinator, &pipeline).await;

    assert_verdict(&run, Verdict::Success, None);
    assert_executed_order(&run, &["install", "test"]);
}
