//! Run coordinator - drives a run from provisioning to verdict

use crate::{
    core::{ErrorKind, Pipeline, Run, RunFailure, RunStateError, Step, StepResult, TriggerEvent, Verdict},
    environment::{Environment, Provisioner},
    execution::{
        abort::{AbortReason, AbortSignal},
        runner::StepRunner,
        scheduler::{StepAction, StepScheduler},
    },
};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events that can occur during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        pipeline_name: String,
        trigger: TriggerEvent,
        total_steps: usize,
    },
    EnvironmentReady {
        run_id: Uuid,
        working_dir: PathBuf,
        capabilities: Vec<String>,
    },
    ProvisionFailed {
        run_id: Uuid,
        error: String,
    },
    StepStarted {
        run_id: Uuid,
        index: usize,
        name: String,
        always_run: bool,
    },
    StepSkipped {
        run_id: Uuid,
        index: usize,
        name: String,
    },
    StepFinished {
        run_id: Uuid,
        result: StepResult,
    },
    RunAborted {
        run_id: Uuid,
        reason: AbortReason,
    },
    EnvironmentTornDown {
        run_id: Uuid,
        error: Option<String>,
    },
    RunCompleted {
        run_id: Uuid,
        verdict: Verdict,
        failure: Option<RunFailure>,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Coordinates runs: provisions, sequences steps, tears down and decides the verdict.
///
/// A coordinator holds no per-run state, so any number of runs may share one.
pub struct RunCoordinator<P, R> {
    provisioner: Arc<P>,
    runner: Arc<R>,
    event_handlers: Arc<Vec<EventHandler>>,
}

impl<P, R> Clone for RunCoordinator<P, R> {
    fn clone(&self) -> Self {
        Self {
            provisioner: Arc::clone(&self.provisioner),
            runner: Arc::clone(&self.runner),
            event_handlers: Arc::clone(&self.event_handlers),
        }
    }
}

impl<P, R> RunCoordinator<P, R>
where
    P: Provisioner + 'static,
    R: StepRunner + 'static,
{
    pub fn new(provisioner: P, runner: R) -> Self {
        Self {
            provisioner: Arc::new(provisioner),
            runner: Arc::new(runner),
            event_handlers: Arc::new(Vec::new()),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        let mut handlers: Vec<EventHandler> = self.event_handlers.iter().cloned().collect();
        handlers.push(Arc::new(handler));
        self.event_handlers = Arc::new(handlers);
        self
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Emit an event to all handlers
    fn emit(&self, event: ExecutionEvent) {
        for handler in self.event_handlers.iter() {
            handler(event.clone());
        }
    }

    /// Start a run in the background and return a handle to observe or cancel it
    pub fn trigger(&self, pipeline: &Pipeline, event: TriggerEvent) -> RunHandle {
        let mut run = Run::new(pipeline, event);
        let run_id = run.id();
        let abort = AbortSignal::new();
        let (status_tx, status_rx) = watch::channel(Verdict::Pending);

        let coordinator = self.clone();
        let signal = abort.clone();
        let task = tokio::spawn(async move {
            coordinator.drive(&mut run, &signal, &status_tx).await?;
            Ok::<Run, RunStateError>(run)
        });

        RunHandle {
            run_id,
            abort,
            status: status_rx,
            task,
        }
    }

    /// Execute a pending run to completion on the current task
    pub async fn execute(&self, run: &mut Run, abort: &AbortSignal) -> Result<Verdict, RunStateError> {
        let (status_tx, _) = watch::channel(run.verdict());
        self.drive(run, abort, &status_tx).await
    }

    async fn drive(
        &self,
        run: &mut Run,
        abort: &AbortSignal,
        status: &watch::Sender<Verdict>,
    ) -> Result<Verdict, RunStateError> {
        let result = self.drive_run(run, abort, status).await;
        if let Err(e) = &result {
            // A run that errored out never reports Running
            error!("Run {} stopped: {}", run.id(), e);
            let verdict = if run.verdict().is_terminal() {
                run.verdict()
            } else {
                Verdict::Failure
            };
            status.send_replace(verdict);
        }
        result
    }

    async fn drive_run(
        &self,
        run: &mut Run,
        abort: &AbortSignal,
        status: &watch::Sender<Verdict>,
    ) -> Result<Verdict, RunStateError> {
        let run_id = run.id();
        run.start()?;
        status.send_replace(run.verdict());

        info!("Starting run {} of pipeline {}", run_id, run.pipeline_name());
        self.emit(ExecutionEvent::RunStarted {
            run_id,
            pipeline_name: run.pipeline_name().to_string(),
            trigger: run.trigger().clone(),
            total_steps: run.steps().len(),
        });

        let watchdog = run.run_timeout().map(|limit| {
            let abort = abort.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(limit) => {
                        if abort.abort(AbortReason::RunTimeout) {
                            warn!("Run {} exceeded its {}s timeout", run_id, limit.as_secs_f64());
                        }
                    }
                    _ = abort.aborted() => {}
                }
            })
        });

        let spec = run.environment().clone();
        let provisioned = tokio::select! {
            result = self.provisioner.provision(&spec) => Some(result),
            _ = abort.aborted() => None,
        };

        let outcome = match provisioned {
            Some(Ok(environment)) => {
                let environment = environment.with_variables(ci_variables(run));
                self.emit(ExecutionEvent::EnvironmentReady {
                    run_id,
                    working_dir: environment.working_dir().to_path_buf(),
                    capabilities: environment.capabilities().iter().cloned().collect(),
                });

                let outcome = self.run_steps(run, &environment, abort).await;
                if let Some(watchdog) = &watchdog {
                    watchdog.abort();
                }
                self.teardown(run_id, environment).await;
                outcome
            }
            Some(Err(e)) => {
                error!("Provisioning failed for run {}: {}", run_id, e);
                self.emit(ExecutionEvent::ProvisionFailed {
                    run_id,
                    error: e.to_string(),
                });
                run.fail(ErrorKind::ProvisionError, None, e.to_string())
            }
            None => Ok(()),
        };

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        if let Some(reason) = abort.reason() {
            self.emit(ExecutionEvent::RunAborted { run_id, reason });
            run.fail(reason.error_kind(), None, reason.to_string())?;
        }
        outcome?;

        let verdict = run.finish()?;
        status.send_replace(verdict);

        info!("Run {} finished: {}", run_id, verdict);
        self.emit(ExecutionEvent::RunCompleted {
            run_id,
            verdict,
            failure: run.failure().cloned(),
        });
        Ok(verdict)
    }

    async fn run_steps(
        &self,
        run: &mut Run,
        environment: &Environment,
        abort: &AbortSignal,
    ) -> Result<(), RunStateError> {
        let run_id = run.id();
        let mut scheduler = StepScheduler::new(run.shared_steps());

        while let Some(action) = scheduler.next(abort) {
            match action {
                StepAction::Skip { step } => {
                    debug!("Skipping step {} of run {}", step.name, run_id);
                    self.emit(ExecutionEvent::StepSkipped {
                        run_id,
                        index: step.index,
                        name: step.name,
                    });
                }
                StepAction::Execute { step, abort: signal } => {
                    self.emit(ExecutionEvent::StepStarted {
                        run_id,
                        index: step.index,
                        name: step.name.clone(),
                        always_run: step.always_run,
                    });

                    let result = self.run_step(&step, environment, &signal).await;
                    scheduler.record(&result);

                    self.emit(ExecutionEvent::StepFinished {
                        run_id,
                        result: result.clone(),
                    });
                    run.record(result)?;
                }
            }
        }

        Ok(())
    }

    /// Check the step's requirements, then hand it to the runner
    async fn run_step(&self, step: &Step, environment: &Environment, abort: &AbortSignal) -> StepResult {
        let missing = environment.missing_capabilities(&step.requires);
        if !missing.is_empty() {
            warn!("Step {} is missing capabilities: {}", step.name, missing.join(", "));
            return StepResult::not_run(
                step,
                ErrorKind::DependencyUnmet,
                format!("missing capabilities: {}", missing.join(", ")),
            );
        }

        info!("Executing step: {}", step.name);
        let result = self.runner.run(step, environment, abort).await;
        match result.error_message() {
            None => info!("Step {} completed successfully", step.name),
            Some(message) => warn!("Step {} failed: {}", step.name, message),
        }
        result
    }

    async fn teardown(&self, run_id: Uuid, environment: Environment) {
        let error = match self.provisioner.teardown(environment).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Teardown failed for run {}: {}", run_id, e);
                Some(e.to_string())
            }
        };
        self.emit(ExecutionEvent::EnvironmentTornDown { run_id, error });
    }
}

/// Variables every step sees besides the environment's own
fn ci_variables(run: &Run) -> Vec<(&'static str, String)> {
    vec![
        ("CI", "true".to_string()),
        ("CI_RUN_ID", run.id().to_string()),
        ("CI_PIPELINE", run.pipeline_name().to_string()),
        ("CI_BRANCH", run.trigger().branch.clone()),
        ("CI_COMMIT", run.trigger().commit.clone()),
        ("CI_EVENT", run.trigger().kind.to_string()),
    ]
}

/// Handle to a run started with [`RunCoordinator::trigger`]
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    abort: AbortSignal,
    status: watch::Receiver<Verdict>,
    task: JoinHandle<Result<Run, RunStateError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current verdict; never blocks
    pub fn verdict(&self) -> Verdict {
        *self.status.borrow()
    }

    /// Request cancellation. Returns false if the run was already aborted.
    pub fn cancel(&self) -> bool {
        self.abort.cancel()
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Wait for the run to finish and take it back
    pub async fn wait(self) -> anyhow::Result<Run> {
        let run = self.task.await.context("Run task failed")??;
        Ok(run)
    }
}
