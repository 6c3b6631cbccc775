//! Core job record types and retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default resubmission cap for new jobs.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job execution status.
///
/// `Failed` covers both "will be resubmitted" and "permanently failed";
/// `retriable` plus the `retried`/`max_retries` counters on the row decide
/// which, see [`Job::is_permanently_failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up.
    Pending,
    /// An attempt is executing.
    Processing,
    /// Completed successfully.
    Completed,
    /// The last attempt failed. `retriable` is false for precondition and
    /// validity failures, which resubmission cannot fix.
    Failed { error: String, retriable: bool },
}

/// Status of a subordinate task within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

/// A recorded sub-step of a job attempt (e.g. "normalize-pdf").
///
/// Whether a failed task fails the parent job is the handler's policy, not
/// the record's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    pub status: TaskStatus,
    pub retried: u32,
    pub completed_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

impl TaskRecord {
    pub fn completed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Completed,
            retried: 0,
            completed_at: Some(Utc::now()),
            detail: None,
        }
    }

    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Failed,
            retried: 0,
            completed_at: None,
            detail: Some(detail.into()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Backoff strategy for resubmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^retry
    Exponential,
    /// Linear backoff: base * retry
    Linear,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Backoff configuration for retriable failures.
///
/// The resubmission *cap* lives on the job row (`max_retries`); this policy
/// only shapes the delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delays.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay before a given resubmission (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((retry - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => {
                let linear = base_ms * (retry as f64);
                linear.min(max_ms)
            }
        };

        // Deterministic "jitter" keyed off the retry number; good enough to
        // spread resubmissions without a RNG.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((retry as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }
}

/// A persisted background job.
///
/// Created on enqueue, mutated by the dispatcher/runner, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Handler name this job routes to
    pub name: String,
    /// Payload, stored verbatim for replay/debugging
    pub payload: serde_json::Value,
    /// Current status
    pub status: JobStatus,
    /// Number of resubmissions so far
    pub retried: u32,
    /// Resubmission cap; beyond it the job is permanently failed
    pub max_retries: u32,
    /// When the job was first enqueued
    pub submitted_at: DateTime<Utc>,
    /// When the job was last mutated
    pub updated_at: DateTime<Utc>,
    /// When the job completed successfully
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job was last resubmitted
    pub last_retried_at: Option<DateTime<Utc>>,
    /// Backoff gate; the job is not claimable before this instant
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Ordered sub-step records from the most recent attempt
    pub tasks: Vec<TaskRecord>,
}

impl Job {
    /// Create a new Pending job.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.into(),
            payload,
            status: JobStatus::Pending,
            retried: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            submitted_at: now,
            updated_at: now,
            completed_at: None,
            last_retried_at: None,
            scheduled_at: None,
            tasks: Vec::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the backoff gate allows claiming this job now.
    pub fn is_ready(&self) -> bool {
        match self.scheduled_at {
            Some(at) => Utc::now() >= at,
            None => true,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed { .. })
    }

    /// Permanently failed: the failure was not retriable, or the retry
    /// budget is spent. Operator territory either way.
    pub fn is_permanently_failed(&self) -> bool {
        match self.status {
            JobStatus::Failed { retriable, .. } => {
                !retriable || self.retried >= self.max_retries
            }
            _ => false,
        }
    }

    /// Mark the job as picked up for an attempt.
    pub fn mark_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.updated_at = Utc::now();
    }

    /// Mark the attempt successful.
    pub fn mark_completed(&mut self, tasks: Vec<TaskRecord>) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        self.tasks = tasks;
    }

    /// Mark the attempt failed.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        retriable: bool,
        tasks: Vec<TaskRecord>,
    ) {
        self.status = JobStatus::Failed {
            error: error.into(),
            retriable,
        };
        self.updated_at = Utc::now();
        self.tasks = tasks;
    }

    /// Whether another resubmission is allowed.
    pub fn can_resubmit(&self) -> bool {
        matches!(self.status, JobStatus::Failed { retriable: true, .. })
            && self.retried < self.max_retries
    }

    /// Resubmit a failed job: back to Pending with an incremented retry
    /// counter and a backoff gate. Returns `false` (without mutating) when
    /// resubmission is not allowed.
    pub fn resubmit(&mut self, delay: Duration) -> bool {
        if !self.can_resubmit() {
            return false;
        }
        let now = Utc::now();
        self.status = JobStatus::Pending;
        self.retried += 1;
        self.last_retried_at = Some(now);
        self.updated_at = now;
        self.scheduled_at = if delay.is_zero() {
            None
        } else {
            Some(now + chrono::Duration::from_std(delay).unwrap_or_default())
        };
        true
    }
}

/// What a handler reports back for one attempt.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The attempt succeeded.
    Completed { tasks: Vec<TaskRecord> },
    /// The attempt failed. `retriable` distinguishes transient store/IO
    /// failures (worth resubmitting) from precondition and validity
    /// failures (retrying those cannot succeed).
    Failed {
        error: String,
        retriable: bool,
        tasks: Vec<TaskRecord>,
    },
}

impl JobOutcome {
    pub fn success(tasks: Vec<TaskRecord>) -> Self {
        Self::Completed { tasks }
    }

    pub fn failure(error: impl Into<String>, retriable: bool, tasks: Vec<TaskRecord>) -> Self {
        Self::Failed {
            error: error.into(),
            retriable,
            tasks,
        }
    }
}
