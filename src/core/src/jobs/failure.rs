//! Outcomes a job handle can resolve to other than a value.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::JobError;

/// Reason used when `cancel` is called without one.
pub const DEFAULT_CANCEL_REASON: &str = "job cancelled";

/// The caller cancelled the job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{reason}")]
pub struct CancellationError {
    pub reason: String,
}

impl CancellationError {
    pub fn new(reason: Option<String>) -> Self {
        Self {
            reason: reason.unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()),
        }
    }
}

impl Default for CancellationError {
    fn default() -> Self {
        Self::new(None)
    }
}

/// An attempt ran longer than its configured timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("job timed out after {}ms", timeout.as_millis())]
pub struct TimeoutError {
    pub timeout: Duration,
}

/// Why a [`super::CancelToken`] was signalled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Interrupt {
    #[error("cancelled: {0}")]
    Cancelled(CancellationError),
    #[error("{0}")]
    TimedOut(TimeoutError),
}

impl From<Interrupt> for JobError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled(err) => JobError::fatal(err.reason).with_code("CANCELLED"),
            Interrupt::TimedOut(err) => JobError::fatal(err.to_string()).with_code("TIMED_OUT"),
        }
    }
}

/// Terminal failure of a submitted job, as seen through its handle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobFailure {
    /// Work kept failing until attempts ran out, or failed fatally
    #[error("job failed: {0}")]
    Failed(JobError),
    #[error("job cancelled: {0}")]
    Cancelled(CancellationError),
    #[error(transparent)]
    TimedOut(TimeoutError),
    /// The scheduler stopped before the job settled
    #[error("scheduler stopped before the job settled")]
    Closed,
}

impl JobFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    /// The work's own error, if this failure came from it.
    pub fn job_error(&self) -> Option<&JobError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}
