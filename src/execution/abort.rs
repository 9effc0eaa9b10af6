//! Run-wide abort signal shared by cancellation and the run timeout

use crate::core::ErrorKind;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Why a run was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// External cancellation request
    Cancelled,
    /// The run exceeded its overall timeout
    RunTimeout,
}

impl AbortReason {
    pub fn error_kind(self) -> ErrorKind {
        match self {
            AbortReason::Cancelled => ErrorKind::Cancelled,
            AbortReason::RunTimeout => ErrorKind::Timeout,
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => f.write_str("run cancelled"),
            AbortReason::RunTimeout => f.write_str("run timeout exceeded"),
        }
    }
}

/// Cloneable abort signal. The first reason wins.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<AbortReason>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal nobody else holds; used for steps that must run after a halt
    pub fn detached() -> Self {
        Self::default()
    }

    /// Abort with `reason`. Returns false if the signal was already aborted.
    pub fn abort(&self, reason: AbortReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn cancel(&self) -> bool {
        self.abort(AbortReason::Cancelled)
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.reason.get().copied()
    }

    /// Completes once the signal is aborted
    pub async fn aborted(&self) {
        self.token.cancelled().await
    }
}
