//! Persistence layer for run history and step logs

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{ErrorKind, EventKind, Run, StepResult, Verdict};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    pub pipeline_name: String,

    pub branch: String,

    pub commit: String,

    pub event: EventKind,

    pub verdict: Verdict,

    /// Kind of the failure that decided the verdict
    pub failure_kind: Option<ErrorKind>,

    /// Step the failure belongs to, if any
    pub failure_step: Option<String>,

    pub failure_message: Option<String>,

    /// Process exit code the run maps to
    pub exit_code: Option<i32>,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Number of steps that produced a result
    pub attempted_steps: usize,

    pub total_steps: usize,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run summary together with its step results
    async fn save_run(&self, summary: &RunSummary, steps: &[StepResult]) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// List runs of a pipeline, newest first
    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;

    /// Step results of a run, in step order
    async fn load_step_results(&self, run_id: Uuid) -> Result<Vec<StepResult>>;
}

/// Save a finished run
pub async fn save_run(backend: &dyn PersistenceBackend, run: &Run) -> Result<()> {
    backend.save_run(&create_summary(run), run.results()).await
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
    steps: RwLock<HashMap<Uuid, Vec<StepResult>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, summary: &RunSummary, steps: &[StepResult]) -> Result<()> {
        self.runs.write().await.insert(summary.run_id, summary.clone());
        self.steps.write().await.insert(summary.run_id, steps.to_vec());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|r| r.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn load_step_results(&self, run_id: Uuid) -> Result<Vec<StepResult>> {
        let steps = self.steps.read().await;
        let mut results = steps.get(&run_id).cloned().unwrap_or_default();
        results.sort_by_key(|r| r.index);
        Ok(results)
    }
}

/// Create a summary from a run
pub fn create_summary(run: &Run) -> RunSummary {
    let failure = run.failure();
    RunSummary {
        run_id: run.id(),
        pipeline_name: run.pipeline_name().to_string(),
        branch: run.trigger().branch.clone(),
        commit: run.trigger().commit.clone(),
        event: run.trigger().kind,
        verdict: run.verdict(),
        failure_kind: failure.map(|f| f.kind),
        failure_step: failure.and_then(|f| f.step.clone()),
        failure_message: failure.map(|f| f.message.clone()),
        exit_code: run.exit_code(),
        started_at: run.started_at().unwrap_or_else(Utc::now),
        completed_at: run.completed_at(),
        attempted_steps: run.results().len(),
        total_steps: run.steps().len(),
    }
}
