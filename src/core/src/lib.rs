//! # Spool Core
//!
//! An in-process asynchronous job scheduler.
//!
//! ## Architecture
//!
//! - **Scheduler**: Runs submitted work under a fixed concurrency cap
//! - **Jobs**: Priorities, the per-job state machine, retry policy and cancellation tokens
//! - **Events**: Lifecycle events published on a panic-isolating event bus
//! - **Config**: Validated scheduler configuration from code, environment or file
//! - **Telemetry**: Structured logging setup for hosts

pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod scheduler;
pub mod telemetry;

pub use config::SchedulerConfig;
pub use error::{ErrorCode, ErrorSeverity, Result, SchedulerError};
pub use scheduler::{JobCanceller, JobHandle, Scheduler, SchedulerStats};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::SchedulerConfig;
    pub use crate::error::{ErrorCode, ErrorSeverity, Result, SchedulerError};
    pub use crate::events::{EventKind, SchedulerEvent, Subscription};
    pub use crate::jobs::{
        CancelToken, CancellationError, Interrupt, Job, JobError, JobFailure, JobId, JobPriority,
        JobSnapshot, JobStatus, RetryPolicy, StopReason, SubmitOptions, TimeoutError,
    };
    pub use crate::scheduler::{JobCanceller, JobHandle, Scheduler, SchedulerStats};
}
