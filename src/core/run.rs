//! Run domain model - one end-to-end execution of a pipeline

use crate::core::{
    config::EnvironmentSpec,
    pipeline::Pipeline,
    state::{ErrorKind, RunFailure, RunStateError, StepResult, Verdict},
    step::Step,
    trigger::TriggerEvent,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One execution of a pipeline for a single trigger.
///
/// Only the run coordinator mutates a run; once the verdict is terminal every
/// mutation is rejected with [`RunStateError::Terminal`].
#[derive(Debug, Clone)]
pub struct Run {
    id: Uuid,
    pipeline_name: String,
    trigger: TriggerEvent,
    environment: EnvironmentSpec,
    run_timeout: Option<Duration>,
    steps: Arc<[Step]>,
    verdict: Verdict,
    failure: Option<RunFailure>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    results: Vec<StepResult>,
}

impl Run {
    /// Create a pending run; step commands are rendered once, here
    pub fn new(pipeline: &Pipeline, trigger: TriggerEvent) -> Self {
        let id = Uuid::new_v4();
        let mut variables = trigger.variables();
        variables.insert("run_id".to_string(), id.to_string());

        Run {
            id,
            pipeline_name: pipeline.name.clone(),
            steps: pipeline.render_steps(&variables),
            environment: pipeline.environment.clone(),
            run_timeout: pipeline.run_timeout,
            trigger,
            verdict: Verdict::Pending,
            failure: None,
            started_at: None,
            completed_at: None,
            results: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    pub fn trigger(&self) -> &TriggerEvent {
        &self.trigger
    }

    pub fn environment(&self) -> &EnvironmentSpec {
        &self.environment
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    /// Steps in declared order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Shared handle to the immutable step list
    pub fn shared_steps(&self) -> Arc<[Step]> {
        Arc::clone(&self.steps)
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    /// The failure that decided the verdict, if any
    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    /// Results of attempted steps, in order
    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    /// Result of a step by name, if it was attempted
    pub fn result(&self, step_name: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.name == step_name)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Process exit code for a finished run (0 on success)
    pub fn exit_code(&self) -> Option<i32> {
        match self.verdict {
            Verdict::Success => Some(0),
            Verdict::Failure => Some(
                self.failure
                    .as_ref()
                    .map(|f| f.kind.exit_code())
                    .unwrap_or_else(|| ErrorKind::StepFailure.exit_code()),
            ),
            Verdict::Pending | Verdict::Running => None,
        }
    }

    /// Pending → Running
    pub(crate) fn start(&mut self) -> Result<(), RunStateError> {
        self.expect(Verdict::Pending)?;
        self.verdict = Verdict::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Append a step result; the first failing required step becomes the run failure
    pub(crate) fn record(&mut self, result: StepResult) -> Result<(), RunStateError> {
        self.expect(Verdict::Running)?;

        if !result.always_run && self.failure.is_none() {
            if let (Some(kind), Some(message)) = (result.error_kind(), result.error_message()) {
                self.failure = Some(RunFailure {
                    kind,
                    step: Some(result.name.clone()),
                    message: message.to_string(),
                });
            }
        }

        self.results.push(result);
        Ok(())
    }

    /// Record a run-level failure; an earlier failure is kept
    pub(crate) fn fail(
        &mut self,
        kind: ErrorKind,
        step: Option<String>,
        message: impl Into<String>,
    ) -> Result<(), RunStateError> {
        self.reject_terminal()?;
        if self.failure.is_none() {
            self.failure = Some(RunFailure {
                kind,
                step,
                message: message.into(),
            });
        }
        Ok(())
    }

    /// Running → Success | Failure
    pub(crate) fn finish(&mut self) -> Result<Verdict, RunStateError> {
        self.expect(Verdict::Running)?;

        if self.failure.is_none() {
            let missing = self.steps.iter().filter(|s| !s.always_run).find(|s| {
                !self
                    .results
                    .iter()
                    .any(|r| r.index == s.index && r.is_success())
            });
            if let Some(step) = missing {
                self.failure = Some(RunFailure {
                    kind: ErrorKind::StepFailure,
                    step: Some(step.name.clone()),
                    message: "required step has no successful result".to_string(),
                });
            }
        }

        self.verdict = if self.failure.is_none() {
            Verdict::Success
        } else {
            Verdict::Failure
        };
        self.completed_at = Some(Utc::now());
        Ok(self.verdict)
    }

    fn expect(&self, expected: Verdict) -> Result<(), RunStateError> {
        self.reject_terminal()?;
        if self.verdict != expected {
            return Err(RunStateError::Unexpected {
                run_id: self.id,
                verdict: self.verdict,
                expected,
            });
        }
        Ok(())
    }

    fn reject_terminal(&self) -> Result<(), RunStateError> {
        if self.verdict.is_terminal() {
            return Err(RunStateError::Terminal {
                run_id: self.id,
                verdict: self.verdict,
            });
        }
        Ok(())
    }
}
