//! Caller-side view of a submitted job.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

use super::engine::Command;
use crate::jobs::{JobFailure, JobId};

/// Awaitable result of a submitted job.
///
/// Resolves exactly once, when the job reaches a terminal state. Dropping the
/// handle does not cancel the job.
pub struct JobHandle<T> {
    id: JobId,
    result: oneshot::Receiver<Result<T, JobFailure>>,
    canceller: JobCanceller<T>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(
        id: JobId,
        result: oneshot::Receiver<Result<T, JobFailure>>,
        commands: mpsc::UnboundedSender<Command<T>>,
    ) -> Self {
        Self {
            id,
            result,
            canceller: JobCanceller { id, commands },
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Cancel with the default reason.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    pub fn cancel_with(&self, reason: impl Into<String>) {
        self.canceller.cancel_with(reason);
    }

    /// A cloneable canceller that outlives this handle.
    pub fn canceller(&self) -> JobCanceller<T> {
        self.canceller.clone()
    }
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, JobFailure>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(JobFailure::Closed)))
    }
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("id", &self.id).finish()
    }
}

/// Cancels one job. Cancelling an already settled job is a no-op.
pub struct JobCanceller<T> {
    id: JobId,
    commands: mpsc::UnboundedSender<Command<T>>,
}

impl<T> JobCanceller<T> {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn cancel(&self) {
        self.send(None);
    }

    pub fn cancel_with(&self, reason: impl Into<String>) {
        self.send(Some(reason.into()));
    }

    fn send(&self, reason: Option<String>) {
        if self
            .commands
            .send(Command::Cancel {
                id: self.id,
                reason,
            })
            .is_err()
        {
            tracing::debug!(job_id = %self.id, "Cancel sent after the scheduler stopped");
        }
    }
}

impl<T> Clone for JobCanceller<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            commands: self.commands.clone(),
        }
    }
}

impl<T> fmt::Debug for JobCanceller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCanceller").field("id", &self.id).finish()
    }
}
