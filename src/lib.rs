//! cirun - a local CI pipeline executor
//!
//! A pipeline is an ordered list of shell steps. Each run provisions a fresh
//! environment, executes the steps fail-fast (always-run steps excepted),
//! tears the environment down and reports a single verdict.

pub mod cli;
pub mod core;
pub mod environment;
pub mod execution;
pub mod persistence;

// Re-export commonly used types
pub use core::{ErrorKind, EventKind, Pipeline, Run, Step, StepResult, TriggerEvent, Verdict};
pub use environment::{Environment, LocalProvisioner, ProvisionError, Provisioner};
pub use execution::{AbortSignal, ExecutionEvent, RunCoordinator, RunHandle, ShellRunner, StepRunner};
