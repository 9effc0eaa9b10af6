//! Execution state models

use crate::core::step::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Overall run verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Run has been created but not started
    Pending,
    /// Run is provisioning or executing steps
    Running,
    /// Every required step succeeded
    Success,
    /// Provisioning failed, a required step failed, or the run was aborted
    Failure,
}

impl Verdict {
    /// Check if the verdict is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Verdict::Success | Verdict::Failure)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verdict::Pending => "pending",
            Verdict::Running => "running",
            Verdict::Success => "success",
            Verdict::Failure => "failure",
        };
        f.write_str(label)
    }
}

/// Why a step or a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The execution environment could not be built
    ProvisionError,
    /// A step's required capability is absent from the environment
    DependencyUnmet,
    /// The command exited non-zero (or could not be spawned)
    StepFailure,
    /// The step or run exceeded its time limit
    Timeout,
    /// The run was cancelled externally
    Cancelled,
}

impl ErrorKind {
    /// Process exit code reported by the CLI for a run failing with this kind
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::StepFailure => 1,
            ErrorKind::ProvisionError => 3,
            ErrorKind::DependencyUnmet => 4,
            ErrorKind::Timeout => 124,
            ErrorKind::Cancelled => 130,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::ProvisionError => "ProvisionError",
            ErrorKind::DependencyUnmet => "DependencyUnmet",
            ErrorKind::StepFailure => "StepFailure",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

/// Outcome of a single attempted step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Success,
    Failed { kind: ErrorKind, message: String },
}

/// Result of attempting one step. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Position of the step in the pipeline
    pub index: usize,

    /// Step name
    pub name: String,

    /// Whether the step was flagged always-run
    pub always_run: bool,

    /// Success or failure with its kind
    pub outcome: StepOutcome,

    /// Process exit code, when the process exited on its own
    pub exit_code: Option<i32>,

    /// Combined stdout/stderr (most recent bytes when truncated)
    pub output: String,

    /// Whether output was dropped to stay within the buffer limit
    pub output_truncated: bool,

    /// When the step started
    pub started_at: DateTime<Utc>,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl StepResult {
    /// A failed result for a step whose process never started
    pub fn not_run(step: &Step, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            index: step.index,
            name: step.name.clone(),
            always_run: step.always_run,
            outcome: StepOutcome::Failed {
                kind,
                message: message.into(),
            },
            exit_code: None,
            output: String::new(),
            output_truncated: false,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Success)
    }

    /// Error kind of a failed step
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            StepOutcome::Success => None,
            StepOutcome::Failed { kind, .. } => Some(*kind),
        }
    }

    /// Failure message of a failed step
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            StepOutcome::Success => None,
            StepOutcome::Failed { message, .. } => Some(message),
        }
    }
}

/// The failure that decided a run's verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,

    /// Name of the failing step, if the failure belongs to one
    pub step: Option<String>,

    pub message: String,
}

/// Attempted mutation of a run in the wrong state
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunStateError {
    #[error("run {run_id} is already {verdict}")]
    Terminal { run_id: Uuid, verdict: Verdict },

    #[error("run {run_id} is {verdict}, expected {expected}")]
    Unexpected {
        run_id: Uuid,
        verdict: Verdict,
        expected: Verdict,
    },
}
