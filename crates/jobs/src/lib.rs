//! Background job lifecycle: persisted records, dispatch, execution.
//!
//! ## Design
//!
//! - The job store is the single source of truth; there is no in-memory
//!   queue. Duplicate dispatches are tolerated through handler idempotency,
//!   not prevented through locking.
//! - `Pending → Processing → {Completed, Failed}` per attempt. A retriable
//!   failure is resubmitted (back to Pending, `retried + 1`, backoff gate)
//!   until `max_retries`; beyond that the job stays Failed and waits for an
//!   operator. Non-retriable failures are never resubmitted.
//! - Handlers live in an explicit [`HandlerRegistry`] built at process start
//!   and passed by reference. No global registration.
//! - Rows are never deleted; terminal jobs are kept for audit and replay.
//!
//! ## Components
//!
//! - [`Job`]/[`TaskRecord`]: the persisted records
//! - [`JobStore`]: persistence boundary (in-memory implementation included;
//!   the relational store is an external collaborator)
//! - [`JobDispatcher`]: inserts Pending rows for registered handlers
//! - [`JobRunner`]: claims and executes attempts off any request-serving
//!   thread

pub mod dispatcher;
pub mod runner;
pub mod store;
pub mod types;

pub use dispatcher::{DispatchError, HandlerRegistry, JobDispatcher, JobHandler};
pub use runner::{JobRunner, RunnerConfig, RunnerHandle, RunnerStats};
pub use store::{InMemoryJobStore, JobStats, JobStore, PersistenceError};
pub use types::{
    BackoffStrategy, Job, JobId, JobOutcome, JobStatus, RetryPolicy, TaskRecord, TaskStatus,
};
