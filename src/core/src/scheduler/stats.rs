//! Scheduler counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters written by the engine and read by any scheduler clone.
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
    retried: AtomicU64,
    pending: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// How a job left the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl Outcome {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }
}

impl StatsRecorder {
    pub(crate) fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("spool_jobs_submitted_total").increment(1);
    }

    pub(crate) fn record_start(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::Relaxed);
        metrics::gauge!("spool_jobs_in_flight").set(current as f64);
    }

    pub(crate) fn record_release(&self) {
        let current = self.in_flight.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::gauge!("spool_jobs_in_flight").set(current as f64);
    }

    pub(crate) fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("spool_jobs_retried_total").increment(1);
    }

    pub(crate) fn record_settled(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Succeeded => &self.succeeded,
            Outcome::Failed => &self.failed,
            Outcome::Cancelled => &self.cancelled,
            Outcome::TimedOut => &self.timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("spool_jobs_settled_total", "outcome" => outcome.as_str())
            .increment(1);
    }

    pub(crate) fn set_pending(&self, pending: usize) {
        self.pending.store(pending, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, concurrency: usize) -> SchedulerStats {
        SchedulerStats {
            concurrency,
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Configured concurrency cap
    pub concurrency: usize,
    /// Jobs accepted by the engine
    pub submitted: u64,
    pub succeeded: u64,
    /// Jobs that exhausted their attempts or failed fatally
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    /// Retries scheduled across all jobs
    pub retried: u64,
    /// Jobs waiting in the priority queue
    pub pending: usize,
    /// Attempts currently running
    pub in_flight: usize,
    /// Highest number of attempts observed running at once
    pub peak_in_flight: usize,
}

impl SchedulerStats {
    /// Jobs that reached a terminal state.
    pub fn settled(&self) -> u64 {
        self.succeeded + self.failed + self.cancelled + self.timed_out
    }

    /// Calculate success rate as a percentage of settled jobs.
    pub fn success_rate(&self) -> f64 {
        let settled = self.settled();
        if settled == 0 {
            return 100.0;
        }
        (self.succeeded as f64 / settled as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let stats = StatsRecorder::default();
        stats.record_start();
        stats.record_start();
        stats.record_release();
        stats.record_start();
        stats.record_release();
        stats.record_release();

        let snapshot = stats.snapshot(4);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.peak_in_flight, 2);
        assert_eq!(snapshot.concurrency, 4);
    }

    #[test]
    fn test_settled_and_success_rate() {
        let stats = StatsRecorder::default();
        assert_eq!(stats.snapshot(1).success_rate(), 100.0);

        stats.record_settled(Outcome::Succeeded);
        stats.record_settled(Outcome::Succeeded);
        stats.record_settled(Outcome::Succeeded);
        stats.record_settled(Outcome::TimedOut);

        let snapshot = stats.snapshot(1);
        assert_eq!(snapshot.settled(), 4);
        assert_eq!(snapshot.timed_out, 1);
        assert!((snapshot.success_rate() - 75.0).abs() < f64::EPSILON);
    }
}
