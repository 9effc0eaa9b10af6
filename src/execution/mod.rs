//! Run execution: abort signalling, step runners, scheduling and coordination

pub mod abort;
pub mod coordinator;
pub mod runner;
pub mod scheduler;

pub use abort::{AbortReason, AbortSignal};
pub use coordinator::{EventHandler, ExecutionEvent, RunCoordinator, RunHandle};
pub use runner::{OutputBuffer, ShellRunner, StepRunner};
pub use scheduler::{StepAction, StepScheduler};
