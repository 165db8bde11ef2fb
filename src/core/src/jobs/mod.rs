//! Job model for the scheduler.
//!
//! - **Job**: ids, status machine, priorities and the trait-based job API
//! - **Failure**: how a job handle resolves when no value is produced
//! - **Token**: the per-attempt cancellation handle given to work
//! - **Queue**: pending jobs ordered by priority, FIFO within a priority
//! - **Retry**: capped exponential backoff with full jitter

pub mod failure;
pub mod job;
pub mod queue;
pub mod retry;
pub mod token;

pub use failure::{
    CancellationError, Interrupt, JobFailure, TimeoutError, DEFAULT_CANCEL_REASON,
};
pub use job::{
    Job, JobError, JobId, JobPriority, JobSnapshot, JobStatus, StopReason, SubmitOptions,
};
pub use queue::PriorityQueue;
pub use retry::RetryPolicy;
pub use token::CancelToken;
