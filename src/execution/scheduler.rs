//! Step scheduler - decides what happens to each step, in declared order

use crate::{
    core::{Step, StepResult},
    execution::abort::AbortSignal,
};
use std::sync::Arc;

/// What to do with the next step
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Run the step, observing `abort`
    Execute { step: Step, abort: AbortSignal },

    /// The run has halted and the step is not always-run
    Skip { step: Step },
}

/// Sequential fail-fast scheduler.
///
/// Steps are visited strictly in order. After the first failing required step,
/// or once the run is aborted, remaining steps are skipped unless they are
/// always-run; those still execute with a detached signal so an abort cannot
/// stop them before they start.
#[derive(Debug)]
pub struct StepScheduler {
    steps: Arc<[Step]>,
    cursor: usize,
    halted: bool,
}

impl StepScheduler {
    pub fn new(steps: Arc<[Step]>) -> Self {
        Self {
            steps,
            cursor: 0,
            halted: false,
        }
    }

    /// Decide the next step, or `None` when every step has been visited
    pub fn next(&mut self, abort: &AbortSignal) -> Option<StepAction> {
        let step = self.steps.get(self.cursor)?.clone();
        self.cursor += 1;

        if abort.is_aborted() {
            self.halted = true;
        }

        let action = if !self.halted {
            StepAction::Execute {
                step,
                abort: abort.clone(),
            }
        } else if step.always_run {
            StepAction::Execute {
                step,
                abort: AbortSignal::detached(),
            }
        } else {
            StepAction::Skip { step }
        };
        Some(action)
    }

    /// Feed back a step result
    pub fn record(&mut self, result: &StepResult) {
        if !result.is_success() && !result.always_run {
            self.halted = true;
        }
    }

    /// Whether a required step has failed or the run was aborted
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Steps not yet visited
    pub fn remaining(&self) -> usize {
        self.steps.len() - self.cursor
    }
}
