//! Test helpers for pipeline scenarios
//!
//! Provides a scripted step runner, a counting provisioner and assertion
//! helpers shared by the scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use cirun::core::config::{EnvironmentSpec, PipelineConfig};
use cirun::core::StepOutcome;
use cirun::{
    AbortSignal, Environment, ErrorKind, ExecutionEvent, Pipeline, ProvisionError, Provisioner,
    Run, RunCoordinator, Step, StepResult, StepRunner, TriggerEvent, Verdict,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What the mock runner does for a step
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Exit 0 with the given output
    Succeed(String),
    /// Exit with a non-zero code
    Fail(i32),
    /// Never finish on its own; ends on step timeout or abort
    Hang,
}

/// Step runner that follows a script instead of spawning processes
#[derive(Clone, Default)]
pub struct MockRunner {
    script: Arc<HashMap<String, Scripted>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl MockRunner {
    /// Steps not in the script succeed with empty output
    pub fn new(script: Vec<(&str, Scripted)>) -> Self {
        Self {
            script: Arc::new(
                script
                    .into_iter()
                    .map(|(name, outcome)| (name.to_string(), outcome))
                    .collect(),
            ),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Names of the steps the runner was asked to run, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepRunner for MockRunner {
    async fn run(&self, step: &Step, _environment: &Environment, abort: &AbortSignal) -> StepResult {
        self.executed.lock().unwrap().push(step.name.clone());

        let started_at = Utc::now();
        let start = Instant::now();
        let (outcome, exit_code, output) = match self.script.get(&step.name).cloned() {
            None => (StepOutcome::Success, Some(0), String::new()),
            Some(Scripted::Succeed(output)) => (StepOutcome::Success, Some(0), output),
            Some(Scripted::Fail(code)) => (
                StepOutcome::Failed {
                    kind: ErrorKind::StepFailure,
                    message: format!("exited with code {}", code),
                },
                Some(code),
                String::new(),
            ),
            Some(Scripted::Hang) => {
                let outcome = tokio::select! {
                    _ = tokio::time::sleep(step.timeout) => StepOutcome::Failed {
                        kind: ErrorKind::Timeout,
                        message: "step timed out".to_string(),
                    },
                    _ = abort.aborted() => {
                        let reason = abort.reason().expect("aborted signal has a reason");
                        StepOutcome::Failed {
                            kind: reason.error_kind(),
                            message: reason.to_string(),
                        }
                    }
                };
                (outcome, None, String::new())
            }
        };

        StepResult {
            index: step.index,
            name: step.name.clone(),
            always_run: step.always_run,
            outcome,
            exit_code,
            output,
            output_truncated: false,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Provisioner handing out fresh temp dirs and counting calls
#[derive(Clone, Default)]
pub struct CountingProvisioner {
    capabilities: Vec<String>,
    fail: bool,
    provisions: Arc<AtomicUsize>,
    teardowns: Arc<AtomicUsize>,
}

impl CountingProvisioner {
    pub fn with_capabilities(capabilities: &[&str]) -> Self {
        Self {
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for CountingProvisioner {
    async fn provision(&self, _spec: &EnvironmentSpec) -> Result<Environment, ProvisionError> {
        self.provisions.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProvisionError::RuntimeNotFound {
                name: "python3".to_string(),
            });
        }

        let workspace = tempfile::Builder::new()
            .prefix("run-")
            .tempdir()
            .map_err(|source| ProvisionError::Workspace {
                path: std::env::temp_dir(),
                source,
            })?;
        Ok(Environment::owned(workspace, self.capabilities.clone()))
    }

    async fn teardown(&self, environment: Environment) -> Result<(), ProvisionError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        drop(environment);
        Ok(())
    }
}

/// Collects every event a coordinator emits
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl EventLog {
    pub fn handler(&self) -> impl Fn(ExecutionEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event| events.lock().unwrap().push(event)
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn skipped(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ExecutionEvent::StepSkipped { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn teardowns(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ExecutionEvent::EnvironmentTornDown { .. }))
            .count()
    }
}

/// Build a step with a 30s timeout
pub fn step(name: &str, command: &str) -> Step {
    Step {
        index: 0,
        name: name.to_string(),
        command: command.to_string(),
        always_run: false,
        requires: BTreeSet::new(),
        timeout: Duration::from_secs(30),
    }
}

pub fn always_run(name: &str, command: &str) -> Step {
    Step {
        always_run: true,
        ..step(name, command)
    }
}

pub fn requiring(name: &str, requires: &[&str]) -> Step {
    Step {
        requires: requires.iter().map(|r| r.to_string()).collect(),
        ..step(name, "true")
    }
}

pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml)
        .expect("Should parse YAML")
        .to_pipeline()
}

/// Run a pipeline to completion on the current task
pub async fn run_pipeline<P, R>(coordinator: &RunCoordinator<P, R>, pipeline: &Pipeline) -> Run
where
    P: Provisioner + 'static,
    R: StepRunner + 'static,
{
    let mut run = Run::new(pipeline, TriggerEvent::manual());
    coordinator
        .execute(&mut run, &AbortSignal::new())
        .await
        .expect("Run should reach a verdict");
    run
}

/// Names of the steps with a recorded result, in order
pub fn attempted(run: &Run) -> Vec<String> {
    run.results().iter().map(|r| r.name.clone()).collect()
}

/// Assert the run reached a verdict and failed with this kind (or succeeded)
pub fn assert_verdict(run: &Run, expected: Verdict, kind: Option<ErrorKind>) {
    assert_eq!(
        run.verdict(),
        expected,
        "unexpected verdict, failure: {:?}",
        run.failure()
    );
    assert_eq!(run.failure().map(|f| f.kind), kind);
}

/// Assert a step has a failed result of the given kind
pub fn assert_step_failed(run: &Run, name: &str, kind: ErrorKind) {
    let result = run
        .result(name)
        .unwrap_or_else(|| panic!("step {} has no result", name));
    assert_eq!(
        result.error_kind(),
        Some(kind),
        "step {} outcome: {:?}",
        name,
        result.outcome
    );
}

pub fn assert_executed_order(run: &Run, expected: &[&str]) {
    let actual = attempted(run);
    assert_eq!(
        actual,
        expected.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        "steps attempted out of order"
    );
}
