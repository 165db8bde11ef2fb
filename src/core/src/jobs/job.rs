//! Job definitions and traits.
//!
//! This module provides the core abstractions for describing work:
//!
//! - **Job trait**: Trait-based alternative to submitting a closure
//! - **JobStatus**: The per-ticket state machine
//! - **JobPriority**: Priority levels and their queue weights
//! - **JobError**: The error a job's own work reports

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::CancelToken;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a submitted job.
///
/// Ids are assigned at submission from a per-scheduler counter, so a larger id
/// always means a later submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    /// Get the raw sequence number.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    /// Waiting in the priority queue
    Queued,
    /// An attempt is executing
    Running,
    /// Waiting out a backoff delay before re-entering the queue
    Retrying,
    /// Work returned a value
    Completed,
    /// Attempts exhausted, or the error was not retryable
    Failed,
    /// Cancelled by the caller
    Cancelled,
    /// The attempt outlived its timeout
    TimedOut,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// Check whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, TimedOut)
                | (Running, Retrying)
                | (Retrying, Queued)
                | (Retrying, Cancelled)
        )
    }

    /// Catalog name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timedOut",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permanent marker recording why a job was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Cancelled,
    TimedOut,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Priority
// ═══════════════════════════════════════════════════════════════════════════════

/// Priority level for jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Dequeued after everything else
    Low = 0,
    /// Default for submissions that do not ask for anything else
    Normal = 1,
    /// Ahead of normal work
    Medium = 2,
    /// Dequeued first
    High = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    /// Get the integer weight used for queue ordering.
    pub fn weight(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for job execution failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Error message
    pub message: String,
    /// Whether the scheduler may try again
    pub retryable: bool,
    /// Optional error code
    pub code: Option<String>,
    /// Additional context
    pub context: Option<serde_json::Value>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn new(message: impl Into<String>) -> Self {
        Self::retryable(message)
    }

    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            code: None,
            context: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            code: None,
            context: None,
        }
    }

    /// Error reported when the work panics.
    pub fn panicked(message: impl Into<String>) -> Self {
        Self::retryable(message).with_code("PANIC")
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Add context.
    pub fn with_context(mut self, context: impl Serialize) -> Self {
        self.context = serde_json::to_value(context).ok();
        self
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<anyhow::Error> for JobError {
    fn from(error: anyhow::Error) -> Self {
        Self::retryable(format!("{:#}", error))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Submission Options
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-submission settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Queue priority
    pub priority: JobPriority,
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    /// Name used in logs
    pub name: Option<&'static str>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// Point-in-time view of a job the scheduler still tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub attempt: u32,
    pub stop_reason: Option<StopReason>,
    pub timeout_ms: Option<u64>,
    pub submitted_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A reusable unit of work producing a `T`.
///
/// Implementors are submitted with [`crate::Scheduler::enqueue`]; `run` is
/// called once per attempt with a fresh token.
#[async_trait]
pub trait Job<T>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        "job"
    }

    /// Execute one attempt.
    ///
    /// # Errors
    ///
    /// Return a `JobError` if the attempt fails. Use `JobError::retryable()`
    /// for transient failures and `JobError::fatal()` to stop retrying.
    async fn run(&self, token: CancelToken) -> Result<T, JobError>;

    /// Queue priority for this job.
    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }

    /// Per-attempt timeout.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
