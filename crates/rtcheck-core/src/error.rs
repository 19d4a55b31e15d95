use std::time::Duration;

use thiserror::Error;

use crate::clock::ClockChannel;

/// Errors produced while configuring or running a probe.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The probe parameters cannot describe a meaningful run.
    #[error("invalid probe configuration: {0}")]
    InvalidConfig(String),
    /// A measured property violated its threshold.
    #[error("{0}")]
    Assertion(String),
    /// Two successive reads of a clock went backwards.
    #[error(
        "{channel} goes back in time at sample {sample} (current = {current}, previous = {previous}); \
         this is usually caused by a non-atomic calculation of the time"
    )]
    ClockRegression {
        channel: ClockChannel,
        sample: u64,
        previous: i64,
        current: i64,
    },
    /// A blocking wait was torn down before the run completed.
    #[error("probe interrupted while {0}")]
    Interrupted(&'static str),
    /// A worker panicked instead of returning its counter.
    #[error("worker {0} panicked")]
    WorkerPanicked(usize),
    /// The host-side safety deadline expired before the clock under test progressed.
    #[error("safety timeout after {elapsed:?} while {during}")]
    SafetyTimeout {
        elapsed: Duration,
        during: &'static str,
    },
    /// The capability under test does not support the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("failed to spawn worker {worker}: {reason}")]
    Spawn { worker: usize, reason: String },
}

impl ProbeError {
    pub fn assertion(message: impl Into<String>) -> Self {
        ProbeError::Assertion(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ProbeError::InvalidConfig(message.into())
    }

    /// Returns `true` when the error is a threshold violation rather than a harness fault.
    pub fn is_assertion(&self) -> bool {
        matches!(
            self,
            ProbeError::Assertion(_) | ProbeError::ClockRegression { .. }
        )
    }
}

/// Fails with an [`ProbeError::Assertion`] carrying `message` when `condition` is false.
pub fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), ProbeError> {
    if condition {
        Ok(())
    } else {
        Err(ProbeError::Assertion(message()))
    }
}
