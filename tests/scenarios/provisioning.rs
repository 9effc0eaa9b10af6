//! Test: provisioning the same environment twice yields equivalent environments

use cirun::core::config::PipelineConfig;
use cirun::{LocalProvisioner, Provisioner};

#[tokio::test]
async fn test_provisioning_is_repeatable() {
    let base = tempfile::tempdir().unwrap();
    let config = PipelineConfig::from_yaml(
        r#"
name: "repeatable"
environment:
  runtime:
    name: sh
  packages:
    - cat
    - name: shell
      probe: sh
    - not-installed-anywhere-xyz
  env:
    MODE: ci
steps:
  - name: build
    command: "true"
"#,
    )
    .unwrap();
    let mut spec = config.environment.clone();
    spec.working_dir = Some(base.path().to_path_buf());

    let provisioner = LocalProvisioner::new();
    let first = provisioner.provision(&spec).await.unwrap();
    let second = provisioner.provision(&spec).await.unwrap();

    assert_eq!(first.capabilities(), second.capabilities());
    assert!(first.has_capability("sh"));
    assert!(first.has_capability("shell"));
    assert!(!first.has_capability("not-installed-anywhere-xyz"));
    assert_eq!(first.variables().get("MODE").map(String::as_str), Some("ci"));
    assert_ne!(first.working_dir(), second.working_dir());

    let dirs = [first.working_dir().to_path_buf(), second.working_dir().to_path_buf()];
    provisioner.teardown(first).await.unwrap();
    provisioner.teardown(second).await.unwrap();
    assert!(dirs.iter().all(|dir| !dir.exists()));
}
