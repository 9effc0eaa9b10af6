//! Test: concurrent runs never share a working directory
//!
//! Two runs of the same pipeline write a marker file, wait, and check that
//! nothing else appeared in their directory.

use crate::helpers::*;
use cirun::{LocalProvisioner, RunCoordinator, ShellRunner, TriggerEvent, Verdict};
use std::path::PathBuf;

#[tokio::test]
async fn test_concurrent_runs_are_isolated() {
    let base = tempfile::tempdir().unwrap();
    let mut pipeline = pipeline_from_yaml(
        r#"
name: "isolation"
steps:
  - name: mark
    command: "echo $CI_RUN_ID > marker"
  - name: check
    command: "sleep 0.3 && test \"$(cat marker)\" = \"$CI_RUN_ID\" && test $(ls | wc -l) -eq 1 && pwd"
"#,
    );
    pipeline.environment.working_dir = Some(base.path().to_path_buf());

    let coordinator = RunCoordinator::new(LocalProvisioner::new(), ShellRunner::default());
    let first = coordinator.trigger(&pipeline, TriggerEvent::manual());
    let second = coordinator.trigger(&pipeline, TriggerEvent::manual());
    assert_ne!(first.run_id(), second.run_id());

    let (first, second) = tokio::join!(first.wait(), second.wait());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_verdict(&first, Verdict::Success, None);
    assert_verdict(&second, Verdict::Success, None);

    let first_dir = PathBuf::from(first.result("check").unwrap().output.trim());
    let second_dir = PathBuf::from(second.result("check").unwrap().output.trim());
    assert_ne!(first_dir, second_dir);
    assert!(!first_dir.exists());
    assert!(!second_dir.exists());
    assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
}
