//! The scheduler's owner task.
//!
//! One task owns the priority queue, the running set, the backoff set and
//! every ticket. Public calls, attempt runners and backoff timers talk to it
//! over a single unbounded channel, so all state changes are serialized.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use super::stats::{Outcome, StatsRecorder};
use crate::events::bus::panic_message;
use crate::events::{EventBus, SchedulerEvent};
use crate::jobs::job::saturating_millis;
use crate::jobs::{
    CancelToken, CancellationError, Interrupt, JobError, JobFailure, JobId, JobPriority,
    JobSnapshot, JobStatus, PriorityQueue, RetryPolicy, StopReason, SubmitOptions, TimeoutError,
};

pub(crate) type BoxWork<T> =
    Box<dyn FnMut(CancelToken) -> BoxFuture<'static, Result<T, JobError>> + Send>;

pub(crate) type Settle<T> = oneshot::Sender<Result<T, JobFailure>>;

// =============================================================================
// Commands
// =============================================================================

/// How one attempt ended, as seen by its runner.
pub(crate) enum AttemptOutcome<T> {
    /// The work settled before anything else happened
    Finished(Result<T, JobError>),
    /// The attempt's token fired
    Interrupted,
    /// The timeout elapsed first
    TimerFired,
}

pub(crate) enum Command<T> {
    Submit(Ticket<T>),
    Cancel {
        id: JobId,
        reason: Option<String>,
    },
    Attempt {
        id: JobId,
        attempt: u32,
        outcome: AttemptOutcome<T>,
    },
    /// A backoff delay elapsed
    Requeue {
        id: JobId,
    },
    Inspect {
        id: JobId,
        reply: oneshot::Sender<Option<JobSnapshot>>,
    },
}

// =============================================================================
// Ticket
// =============================================================================

/// One submitted job and its execution state.
pub(crate) struct Ticket<T> {
    id: JobId,
    name: &'static str,
    priority: JobPriority,
    timeout: Option<Duration>,
    status: JobStatus,
    attempt: u32,
    stop_reason: Option<StopReason>,
    cancel_reason: Option<String>,
    submitted_at: DateTime<Utc>,
    work: BoxWork<T>,
    token: Option<CancelToken>,
    settle: Option<Settle<T>>,
    /// Keeps the engine's channel open while this ticket is outstanding.
    commands: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Ticket<T> {
    pub(crate) fn new(
        id: JobId,
        options: SubmitOptions,
        work: BoxWork<T>,
        settle: Settle<T>,
        commands: mpsc::UnboundedSender<Command<T>>,
    ) -> Self {
        Self {
            id,
            name: options.name.unwrap_or("job"),
            priority: options.priority,
            timeout: options.timeout,
            status: JobStatus::Queued,
            attempt: 1,
            stop_reason: None,
            cancel_reason: None,
            submitted_at: Utc::now(),
            work,
            token: None,
            settle: Some(settle),
            commands,
        }
    }

    fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                job_id = %self.id,
                from = %self.status,
                to = %next,
                "Ignoring illegal job status transition"
            );
            return false;
        }
        self.status = next;
        true
    }

    fn settle(&mut self, result: Result<T, JobFailure>) {
        if let Some(settle) = self.settle.take() {
            // The caller may have dropped its handle.
            let _ = settle.send(result);
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            name: self.name.to_string(),
            priority: self.priority,
            status: self.status,
            attempt: self.attempt,
            stop_reason: self.stop_reason,
            timeout_ms: self.timeout.map(saturating_millis),
            submitted_at: self.submitted_at,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

pub(crate) struct Engine<T> {
    commands: mpsc::UnboundedReceiver<Command<T>>,
    bus: EventBus<SchedulerEvent<T>>,
    stats: Arc<StatsRecorder>,
    policy: RetryPolicy,
    concurrency: usize,
    queue: PriorityQueue<Ticket<T>>,
    running: HashMap<JobId, Ticket<T>>,
    backoff: HashMap<JobId, Ticket<T>>,
    /// Set once `drained` has been reported, cleared when work is added.
    drained: bool,
}

impl<T> Engine<T>
where
    T: Clone + Send + 'static,
{
    pub(crate) fn new(
        commands: mpsc::UnboundedReceiver<Command<T>>,
        bus: EventBus<SchedulerEvent<T>>,
        stats: Arc<StatsRecorder>,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            commands,
            bus,
            stats,
            policy,
            concurrency,
            queue: PriorityQueue::new(),
            running: HashMap::new(),
            backoff: HashMap::new(),
            drained: true,
        }
    }

    /// Process commands until every sender is gone.
    ///
    /// Commands already waiting in the channel are handled as one batch before
    /// the dispatch loop runs.
    pub(crate) async fn run(mut self) {
        tracing::debug!(concurrency = self.concurrency, "Scheduler engine started");

        while let Some(command) = self.commands.recv().await {
            self.handle(command);
            while let Ok(command) = self.commands.try_recv() {
                self.handle(command);
            }
            self.dispatch();
            self.check_drained();
            self.stats.set_pending(self.queue.len());
        }

        tracing::debug!("Scheduler engine stopped");
    }

    fn handle(&mut self, command: Command<T>) {
        match command {
            Command::Submit(ticket) => self.submit(ticket),
            Command::Cancel { id, reason } => self.cancel(id, reason),
            Command::Attempt {
                id,
                attempt,
                outcome,
            } => self.finish_attempt(id, attempt, outcome),
            Command::Requeue { id } => self.requeue(id),
            Command::Inspect { id, reply } => {
                let _ = reply.send(self.find(id).map(Ticket::snapshot));
            }
        }
    }

    fn find(&self, id: JobId) -> Option<&Ticket<T>> {
        self.queue
            .get(id)
            .or_else(|| self.running.get(&id))
            .or_else(|| self.backoff.get(&id))
    }

    fn emit(&self, event: SchedulerEvent<T>) {
        self.bus.emit(&event);
    }

    fn enqueue(&mut self, ticket: Ticket<T>) {
        let id = ticket.id;
        self.queue.insert(id, ticket.priority, ticket);
        self.drained = false;
        self.emit(SchedulerEvent::Queued { id });
    }

    fn submit(&mut self, ticket: Ticket<T>) {
        tracing::debug!(
            job_id = %ticket.id,
            job_name = ticket.name,
            priority = %ticket.priority,
            timeout_ms = ticket.timeout.map(saturating_millis),
            "Job submitted"
        );
        self.stats.record_submit();
        self.enqueue(ticket);
    }

    fn requeue(&mut self, id: JobId) {
        let Some(mut ticket) = self.backoff.remove(&id) else {
            // Cancelled while waiting out the delay.
            return;
        };
        if ticket.transition(JobStatus::Queued) {
            tracing::debug!(job_id = %id, attempt = ticket.attempt, "Job re-queued after backoff");
            self.enqueue(ticket);
        }
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Start queued tickets while capacity remains.
    fn dispatch(&mut self) {
        while self.running.len() < self.concurrency {
            let Some(ticket) = self.queue.pop_front() else {
                break;
            };
            self.launch(ticket);
        }
    }

    fn launch(&mut self, mut ticket: Ticket<T>) {
        if !ticket.transition(JobStatus::Running) {
            return;
        }

        let id = ticket.id;
        let attempt = ticket.attempt;
        let token = CancelToken::new();
        ticket.token = Some(token.clone());
        self.stats.record_start();

        tracing::debug!(job_id = %id, attempt, "Job started");
        self.emit(SchedulerEvent::Started { id, attempt });

        let work: BoxFuture<'static, Result<T, JobError>> = match catch_unwind(AssertUnwindSafe(|| (ticket.work)(token.clone()))) {
            Ok(work) => work,
            Err(payload) => {
                let error = JobError::panicked(panic_message(payload.as_ref()));
                Box::pin(async move { Err(error) })
            }
        };

        let span = tracing::debug_span!("job_attempt", job_id = %id, job_name = ticket.name, attempt);
        tokio::spawn(
            run_attempt(
                id,
                attempt,
                work,
                token,
                ticket.timeout,
                ticket.commands.clone(),
            )
            .instrument(span),
        );

        self.running.insert(id, ticket);
    }

    // -------------------------------------------------------------------------
    // Cancellation
    // -------------------------------------------------------------------------

    fn cancel(&mut self, id: JobId, reason: Option<String>) {
        let pending = self.queue.remove(id).or_else(|| self.backoff.remove(&id));
        if let Some(mut ticket) = pending {
            ticket.stop_reason = Some(StopReason::Cancelled);
            ticket.cancel_reason = reason;
            self.finish_cancelled(ticket);
            return;
        }

        let Some(ticket) = self.running.get_mut(&id) else {
            tracing::trace!(job_id = %id, "Cancel ignored for unknown or settled job");
            return;
        };
        if ticket.stop_reason.is_some() {
            return;
        }

        tracing::debug!(job_id = %id, attempt = ticket.attempt, "Signalling running job to stop");
        ticket.stop_reason = Some(StopReason::Cancelled);
        ticket.cancel_reason = reason.clone();
        if let Some(token) = &ticket.token {
            token.signal(Interrupt::Cancelled(CancellationError::new(reason)));
        }
    }

    fn finish_cancelled(&mut self, mut ticket: Ticket<T>) {
        if !ticket.transition(JobStatus::Cancelled) {
            return;
        }
        let id = ticket.id;
        let reason = ticket.cancel_reason.clone();
        tracing::debug!(job_id = %id, reason = ?reason, "Job cancelled");

        self.stats.record_settled(Outcome::Cancelled);
        self.emit(SchedulerEvent::Cancelled {
            id,
            reason: reason.clone(),
        });
        ticket.settle(Err(JobFailure::Cancelled(CancellationError::new(reason))));
    }

    // -------------------------------------------------------------------------
    // Attempt completion
    // -------------------------------------------------------------------------

    fn finish_attempt(&mut self, id: JobId, attempt: u32, outcome: AttemptOutcome<T>) {
        let Some(ticket) = self.running.remove(&id) else {
            tracing::warn!(job_id = %id, attempt, "Attempt report for a job that is not running");
            return;
        };
        self.stats.record_release();

        match outcome {
            AttemptOutcome::Finished(Ok(value)) => self.finish_succeeded(ticket, value),
            AttemptOutcome::Finished(Err(error)) => match ticket.stop_reason {
                Some(StopReason::Cancelled) => self.finish_cancelled(ticket),
                Some(StopReason::TimedOut) => self.finish_timed_out(ticket),
                None if self.policy.should_retry(ticket.attempt, &error) => {
                    self.schedule_retry(ticket, error)
                }
                None => self.finish_failed(ticket, error),
            },
            AttemptOutcome::Interrupted => self.finish_cancelled(ticket),
            AttemptOutcome::TimerFired => match ticket.stop_reason {
                Some(StopReason::Cancelled) => self.finish_cancelled(ticket),
                _ => self.finish_timed_out(ticket),
            },
        }
    }

    fn finish_succeeded(&mut self, mut ticket: Ticket<T>, value: T) {
        if !ticket.transition(JobStatus::Completed) {
            return;
        }
        let id = ticket.id;
        tracing::debug!(job_id = %id, attempt = ticket.attempt, "Job succeeded");

        self.stats.record_settled(Outcome::Succeeded);
        self.emit(SchedulerEvent::Succeeded {
            id,
            value: value.clone(),
        });
        ticket.settle(Ok(value));
    }

    fn finish_failed(&mut self, mut ticket: Ticket<T>, error: JobError) {
        if !ticket.transition(JobStatus::Failed) {
            return;
        }
        let id = ticket.id;
        tracing::warn!(
            job_id = %id,
            job_name = ticket.name,
            attempt = ticket.attempt,
            retryable = error.retryable,
            error = %error,
            "Job failed"
        );

        self.stats.record_settled(Outcome::Failed);
        self.emit(SchedulerEvent::Failed {
            id,
            error: error.clone(),
        });
        ticket.settle(Err(JobFailure::Failed(error)));
    }

    fn finish_timed_out(&mut self, mut ticket: Ticket<T>) {
        if !ticket.transition(JobStatus::TimedOut) {
            return;
        }
        let id = ticket.id;
        let timeout = ticket.timeout.unwrap_or_default();
        ticket.stop_reason = Some(StopReason::TimedOut);
        let error = TimeoutError { timeout };
        // The work task keeps running detached; tell it to stop.
        if let Some(token) = &ticket.token {
            token.signal(Interrupt::TimedOut(error));
        }
        tracing::debug!(
            job_id = %id,
            attempt = ticket.attempt,
            timeout_ms = saturating_millis(timeout),
            "Job timed out"
        );

        self.stats.record_settled(Outcome::TimedOut);
        self.emit(SchedulerEvent::TimedOut {
            id,
            timeout: ticket.timeout,
        });
        ticket.settle(Err(JobFailure::TimedOut(error)));
    }

    fn schedule_retry(&mut self, mut ticket: Ticket<T>, error: JobError) {
        if !ticket.transition(JobStatus::Retrying) {
            return;
        }
        let id = ticket.id;
        let delay = self.policy.delay_for_attempt(ticket.attempt);
        ticket.attempt += 1;
        ticket.token = None;

        tracing::debug!(
            job_id = %id,
            attempt = ticket.attempt,
            delay_ms = saturating_millis(delay),
            error = %error,
            "Retrying job after backoff"
        );
        self.stats.record_retry();
        self.emit(SchedulerEvent::Retrying {
            id,
            attempt: ticket.attempt,
            delay,
            error: Some(error),
        });

        let commands = ticket.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::Requeue { id });
        });
        self.backoff.insert(id, ticket);
    }

    // -------------------------------------------------------------------------
    // Drain
    // -------------------------------------------------------------------------

    fn check_drained(&mut self) {
        if self.drained || !self.running.is_empty() || !self.queue.is_empty() {
            return;
        }
        self.drained = true;
        tracing::debug!(backing_off = self.backoff.len(), "Scheduler drained");
        self.emit(SchedulerEvent::Drained { remaining: 0 });
    }
}

/// Run one attempt and report how it ended.
///
/// The work runs in its own task. If the token fires or the timeout elapses
/// first, that task is detached and its result is never observed.
async fn run_attempt<T>(
    id: JobId,
    attempt: u32,
    work: BoxFuture<'static, Result<T, JobError>>,
    token: CancelToken,
    timeout: Option<Duration>,
    commands: mpsc::UnboundedSender<Command<T>>,
) where
    T: Send + 'static,
{
    let mut task = tokio::spawn(work);
    let timer = async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        biased;
        joined = &mut task => AttemptOutcome::Finished(match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                Err(JobError::panicked(panic_message(err.into_panic().as_ref())))
            }
            Err(err) => Err(JobError::new(format!("job task stopped: {}", err))),
        }),
        _ = token.cancelled() => AttemptOutcome::Interrupted,
        _ = timer => AttemptOutcome::TimerFired,
    };

    let _ = commands.send(Command::Attempt {
        id,
        attempt,
        outcome,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use parking_lot::Mutex;

    type Seen = Arc<Mutex<Vec<EventKind>>>;

    fn engine(concurrency: usize) -> (Engine<u32>, mpsc::UnboundedSender<Command<u32>>, Seen) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = EventBus::new();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        for kind in EventKind::ALL {
            let seen = Arc::clone(&seen);
            let _ = bus.subscribe(kind.as_str(), move |event: &SchedulerEvent<u32>| {
                seen.lock().push(event.kind())
            });
        }
        let engine = Engine::new(
            rx,
            bus,
            Arc::new(StatsRecorder::default()),
            RetryPolicy::default(),
            concurrency,
        );
        (engine, tx, seen)
    }

    fn make_ticket(
        id: u64,
        priority: JobPriority,
        tx: &mpsc::UnboundedSender<Command<u32>>,
    ) -> (Ticket<u32>, oneshot::Receiver<Result<u32, JobFailure>>) {
        let (settle, result) = oneshot::channel();
        let work: BoxWork<u32> = Box::new(
            |_token: CancelToken| -> BoxFuture<'static, Result<u32, JobError>> {
                Box::pin(std::future::pending())
            },
        );
        let ticket = Ticket::new(
            JobId(id),
            SubmitOptions::new().priority(priority),
            work,
            settle,
            tx.clone(),
        );
        (ticket, result)
    }

    #[tokio::test]
    async fn test_dispatch_respects_concurrency() {
        let (mut engine, tx, _seen) = engine(2);
        for id in 1..=5 {
            let (ticket, _result) = make_ticket(id, JobPriority::Normal, &tx);
            engine.handle(Command::Submit(ticket));
        }
        engine.dispatch();

        assert_eq!(engine.running.len(), 2);
        assert_eq!(engine.queue.len(), 3);
        assert!(engine.running.contains_key(&JobId(1)));
        assert!(engine.running.contains_key(&JobId(2)));
    }

    #[tokio::test]
    async fn test_batched_submissions_dispatch_by_priority() {
        let (mut engine, tx, _seen) = engine(1);
        let (low, _r1) = make_ticket(1, JobPriority::Low, &tx);
        let (high, _r2) = make_ticket(2, JobPriority::High, &tx);
        engine.handle(Command::Submit(low));
        engine.handle(Command::Submit(high));
        engine.dispatch();

        assert!(engine.running.contains_key(&JobId(2)));
        assert_eq!(engine.queue.ids().collect::<Vec<_>>(), vec![JobId(1)]);
    }

    #[tokio::test]
    async fn test_cancel_queued_ticket_settles_immediately() {
        let (mut engine, tx, seen) = engine(1);
        let (ticket, mut result) = make_ticket(1, JobPriority::Normal, &tx);
        engine.handle(Command::Submit(ticket));
        engine.handle(Command::Cancel {
            id: JobId(1),
            reason: Some("nope".into()),
        });
        engine.handle(Command::Cancel {
            id: JobId(1),
            reason: None,
        });
        engine.dispatch();
        engine.check_drained();

        assert_eq!(
            result.try_recv().unwrap(),
            Err(JobFailure::Cancelled(CancellationError::new(Some("nope".into()))))
        );
        assert_eq!(
            *seen.lock(),
            vec![EventKind::Queued, EventKind::Cancelled, EventKind::Drained]
        );
    }

    #[tokio::test]
    async fn test_cancel_running_ticket_only_signals() {
        let (mut engine, tx, _seen) = engine(1);
        let (ticket, mut result) = make_ticket(1, JobPriority::Normal, &tx);
        engine.handle(Command::Submit(ticket));
        engine.dispatch();
        engine.handle(Command::Cancel {
            id: JobId(1),
            reason: None,
        });

        let running = &engine.running[&JobId(1)];
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.stop_reason, Some(StopReason::Cancelled));
        assert!(running.token.as_ref().is_some_and(CancelToken::is_cancelled));
        assert!(result.try_recv().is_err());

        engine.handle(Command::Attempt {
            id: JobId(1),
            attempt: 1,
            outcome: AttemptOutcome::Interrupted,
        });
        assert!(matches!(
            result.try_recv().unwrap(),
            Err(JobFailure::Cancelled(_))
        ));
        assert!(engine.running.is_empty());
    }

    #[tokio::test]
    async fn test_timer_after_cancel_resolves_as_cancelled() {
        let (mut engine, tx, seen) = engine(1);
        let (ticket, mut result) = make_ticket(1, JobPriority::Normal, &tx);
        engine.handle(Command::Submit(ticket));
        engine.dispatch();
        engine.handle(Command::Cancel {
            id: JobId(1),
            reason: None,
        });
        engine.handle(Command::Attempt {
            id: JobId(1),
            attempt: 1,
            outcome: AttemptOutcome::TimerFired,
        });

        assert!(result.try_recv().unwrap().unwrap_err().is_cancelled());
        assert!(!seen.lock().contains(&EventKind::TimedOut));
    }

    #[tokio::test]
    async fn test_fatal_error_skips_retry() {
        let (mut engine, tx, seen) = engine(1);
        let (ticket, mut result) = make_ticket(1, JobPriority::Normal, &tx);
        engine.handle(Command::Submit(ticket));
        engine.dispatch();
        engine.handle(Command::Attempt {
            id: JobId(1),
            attempt: 1,
            outcome: AttemptOutcome::Finished(Err(JobError::fatal("bad input"))),
        });

        let failure = result.try_recv().unwrap().unwrap_err();
        assert_eq!(failure.job_error().map(|e| e.message.as_str()), Some("bad input"));
        assert!(engine.backoff.is_empty());
        assert!(!seen.lock().contains(&EventKind::Retrying));
    }

    #[tokio::test]
    async fn test_retry_moves_ticket_to_backoff() {
        let (mut engine, tx, _seen) = engine(1);
        let (ticket, _result) = make_ticket(1, JobPriority::Normal, &tx);
        engine.handle(Command::Submit(ticket));
        engine.dispatch();
        engine.handle(Command::Attempt {
            id: JobId(1),
            attempt: 1,
            outcome: AttemptOutcome::Finished(Err(JobError::new("flaky"))),
        });

        let waiting = &engine.backoff[&JobId(1)];
        assert_eq!(waiting.status, JobStatus::Retrying);
        assert_eq!(waiting.attempt, 2);
        assert!(waiting.token.is_none());

        engine.handle(Command::Requeue { id: JobId(1) });
        assert!(engine.backoff.is_empty());
        assert_eq!(engine.queue.get(JobId(1)).map(|t| t.status), Some(JobStatus::Queued));
    }

    #[tokio::test]
    async fn test_inspect_reports_snapshot() {
        let (mut engine, tx, _seen) = engine(1);
        let (ticket, _result) = make_ticket(1, JobPriority::High, &tx);
        engine.handle(Command::Submit(ticket));

        let (reply, snapshot) = oneshot::channel();
        engine.handle(Command::Inspect {
            id: JobId(1),
            reply,
        });
        let snapshot = snapshot.await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Queued);
        assert_eq!(snapshot.priority, JobPriority::High);
        assert_eq!(snapshot.attempt, 1);

        let (reply, missing) = oneshot::channel();
        engine.handle(Command::Inspect {
            id: JobId(9),
            reply,
        });
        assert!(missing.await.unwrap().is_none());
    }
}
