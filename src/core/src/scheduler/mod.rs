//! In-process job scheduler.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌───────────────────────────────────────────┐
//! │  Scheduler   │────────────▶│                 Engine task               │
//! │  JobHandle   │             │  PriorityQueue ─▶ running ─▶ backoff      │
//! └──────────────┘             │        ▲             │          │         │
//!        ▲                     │        └─────────────┼──────────┘         │
//!        │ settle              │                      ▼                    │
//!        └─────────────────────│  EventBus ◀── lifecycle transitions       │
//!                              └───────────────────────────────────────────┘
//!                                     │ spawn            ▲ attempt outcome
//!                                     ▼                  │
//!                              ┌───────────────────────────────────────────┐
//!                              │  attempt runner: work vs token vs timer   │
//!                              └───────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use spool_core::prelude::*;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::new(4))?;
//! let _sub = scheduler.on(EventKind::Failed, |event| tracing::warn!(?event, "job failed"));
//!
//! let handle = scheduler.submit_with(
//!     |token| async move { Ok::<_, JobError>(42) },
//!     SubmitOptions::new().priority(JobPriority::High).timeout_ms(500),
//! );
//! assert_eq!(handle.await?, 42);
//! ```

mod engine;
mod handle;
mod stats;

pub use handle::{JobCanceller, JobHandle};
pub use stats::SchedulerStats;

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::events::{EventBus, EventKind, SchedulerEvent, Subscription};
use crate::jobs::{
    CancelToken, Job, JobError, JobId, JobSnapshot, RetryPolicy, SubmitOptions,
};
use engine::{BoxWork, Command, Engine, Ticket};
use stats::StatsRecorder;

struct Inner<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    bus: EventBus<SchedulerEvent<T>>,
    stats: Arc<StatsRecorder>,
    policy: RetryPolicy,
    concurrency: usize,
    next_id: AtomicU64,
}

/// Runs submitted jobs under a fixed concurrency cap.
///
/// Cloning is cheap; all clones address the same engine. The engine task
/// stops once every clone, handle and outstanding job is gone.
pub struct Scheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("concurrency", &self.inner.concurrency)
            .field("policy", &self.inner.policy)
            .finish()
    }
}

impl<T> Scheduler<T>
where
    T: Clone + Send + 'static,
{
    /// Validate `config` and start the engine on the current tokio runtime.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let policy = RetryPolicy::from_config(&config)?;
        let runtime = Handle::try_current()
            .map_err(|err| SchedulerError::runtime_unavailable().with_source(err))?;

        let (commands, receiver) = mpsc::unbounded_channel();
        let bus = EventBus::new();
        let stats = Arc::new(StatsRecorder::default());

        let engine = Engine::new(
            receiver,
            bus.clone(),
            Arc::clone(&stats),
            policy,
            config.concurrency,
        );
        runtime.spawn(engine.run());

        tracing::info!(
            concurrency = config.concurrency,
            max_attempts = policy.max_attempts(),
            base_delay_ms = config.base_delay_ms,
            max_delay_ms = config.max_delay_ms,
            "Scheduler created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                commands,
                bus,
                stats,
                policy,
                concurrency: config.concurrency,
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Submit work with normal priority and no timeout.
    pub fn submit<F, Fut>(&self, work: F) -> JobHandle<T>
    where
        F: FnMut(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, JobError>> + Send + 'static,
    {
        self.submit_with(work, SubmitOptions::default())
    }

    /// Submit work with explicit priority, timeout and name.
    ///
    /// `work` is called once per attempt with that attempt's token.
    pub fn submit_with<F, Fut>(&self, mut work: F, options: SubmitOptions) -> JobHandle<T>
    where
        F: FnMut(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, JobError>> + Send + 'static,
    {
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (settle, result) = oneshot::channel();
        let work: BoxWork<T> = Box::new(
            move |token: CancelToken| -> BoxFuture<'static, std::result::Result<T, JobError>> {
                Box::pin(work(token))
            },
        );

        let ticket = Ticket::new(id, options, work, settle, self.inner.commands.clone());
        if self.inner.commands.send(Command::Submit(ticket)).is_err() {
            // The ticket's settle sender is dropped with it, so the handle
            // resolves to `JobFailure::Closed`.
            SchedulerError::closed().with_context("job_id", id.value()).log();
        }

        JobHandle::new(id, result, self.inner.commands.clone())
    }

    /// Submit a trait-based job using its own priority, timeout and name.
    pub fn enqueue<J>(&self, job: Arc<J>) -> JobHandle<T>
    where
        J: Job<T> + 'static,
    {
        let options = SubmitOptions {
            priority: job.priority(),
            timeout: job.timeout(),
            name: Some(job.name()),
        };
        self.submit_with(
            move |token| {
                let job = Arc::clone(&job);
                async move { job.run(token).await }
            },
            options,
        )
    }

    /// Cancel a job by id. A no-op for unknown or settled jobs.
    pub fn cancel(&self, id: JobId, reason: Option<String>) {
        if self
            .inner
            .commands
            .send(Command::Cancel { id, reason })
            .is_err()
        {
            tracing::debug!(job_id = %id, "Cancel sent after the scheduler stopped");
        }
    }

    /// Subscribe to one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SchedulerEvent<T>) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(kind.as_str(), handler)
    }

    /// Subscribe to every event kind with one handler.
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SchedulerEvent<T>) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let subscriptions = EventKind::ALL
            .iter()
            .map(|kind| {
                let handler = Arc::clone(&handler);
                self.inner
                    .bus
                    .subscribe(kind.as_str(), move |event: &SchedulerEvent<T>| handler(event))
            })
            .collect();
        Subscription::merge(subscriptions)
    }

    /// Snapshot of a job that is queued, running or waiting out a backoff.
    ///
    /// Returns `None` for unknown or settled jobs.
    pub async fn inspect(&self, id: JobId) -> Option<JobSnapshot> {
        let (reply, snapshot) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Inspect { id, reply })
            .ok()?;
        snapshot.await.ok().flatten()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.snapshot(self.inner.concurrency)
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// The bus this scheduler publishes on.
    pub fn events(&self) -> &EventBus<SchedulerEvent<T>> {
        &self.inner.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_new_requires_runtime() {
        let err = Scheduler::<u32>::new(SchedulerConfig::new(1)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RuntimeUnavailable);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let err = Scheduler::<u32>::new(SchedulerConfig::new(0)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[tokio::test]
    async fn test_ids_increase_with_submission_order() {
        let scheduler = Scheduler::new(SchedulerConfig::new(2)).unwrap();
        let first = scheduler.submit(|_| async { Ok::<_, JobError>(1u32) });
        let second = scheduler.submit(|_| async { Ok::<_, JobError>(2u32) });

        assert_eq!(first.id(), JobId(1));
        assert_eq!(second.id(), JobId(2));
        assert_eq!(first.await, Ok(1));
        assert_eq!(second.await, Ok(2));
    }

    #[tokio::test]
    async fn test_enqueue_trait_job() {
        struct Doubler(u32);

        #[async_trait::async_trait]
        impl Job<u32> for Doubler {
            fn name(&self) -> &'static str {
                "doubler"
            }

            async fn run(&self, _token: CancelToken) -> std::result::Result<u32, JobError> {
                Ok(self.0 * 2)
            }
        }

        let scheduler = Scheduler::new(SchedulerConfig::new(1)).unwrap();
        assert_eq!(scheduler.enqueue(Arc::new(Doubler(21))).await, Ok(42));
    }
}
