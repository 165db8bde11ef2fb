//! Per-attempt cancellation handle passed to work.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use super::Interrupt;

/// Signals a running attempt that it should stop.
///
/// A fresh token is created for every attempt. Cancellation is cooperative:
/// the scheduler stops waiting for the attempt once the token fires, but it
/// never aborts the work itself.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
    reason: Arc<OnceLock<Interrupt>>,
}

impl CancelToken {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Check if the attempt has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Wait until the token fires.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// Why the token fired, if it has.
    pub fn reason(&self) -> Option<Interrupt> {
        self.reason.get().cloned()
    }

    /// Run `future` unless the token fires first.
    pub async fn run_until_cancelled<F>(&self, future: F) -> Result<F::Output, Interrupt>
    where
        F: Future,
    {
        tokio::select! {
            output = future => Ok(output),
            _ = self.inner.cancelled() => Err(self.reason().unwrap_or_else(|| {
                Interrupt::Cancelled(Default::default())
            })),
        }
    }

    /// Fire the token. The first interrupt wins.
    pub(crate) fn signal(&self, interrupt: Interrupt) {
        let _ = self.reason.set(interrupt);
        self.inner.cancel();
    }
}
