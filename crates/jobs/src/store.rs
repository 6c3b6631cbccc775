//! Job storage abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::types::{Job, JobId, JobStatus};

/// Job store failure.
///
/// A failed `enqueue` means the caller must assume the job was never
/// scheduled.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PersistenceError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Backend(String),
}

/// Per-status job counts for operator visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    /// Failed but still inside the retry budget.
    pub failed: usize,
    /// Failed with the retry budget spent; needs operator intervention.
    pub permanently_failed: usize,
}

/// Persistence boundary for job rows.
///
/// The production implementation is a relational table owned elsewhere; the
/// trait is what this crate programs against. Jobs are never deleted, so
/// there is deliberately no removal operation.
pub trait JobStore: Send + Sync {
    /// Insert a new job row.
    fn enqueue(&self, job: Job) -> Result<JobId, PersistenceError>;

    /// Fetch a job by id.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, PersistenceError>;

    /// Persist an updated job row.
    fn update(&self, job: &Job) -> Result<(), PersistenceError>;

    /// Atomically claim the oldest ready Pending job, marking it
    /// Processing. Returns None when nothing is claimable.
    fn claim_next(&self) -> Result<Option<Job>, PersistenceError>;

    /// List jobs currently in a status (matched by variant, ignoring any
    /// embedded error string), oldest first.
    fn list_by_status(&self, status: &JobStatus, limit: usize)
    -> Result<Vec<Job>, PersistenceError>;

    /// List jobs routed to a handler name, oldest first.
    fn list_by_name(&self, name: &str, limit: usize) -> Result<Vec<Job>, PersistenceError>;

    /// Per-status counts.
    fn stats(&self) -> Result<JobStats, PersistenceError>;
}

/// In-memory job store for tests, tooling and dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot every row, oldest first. Tooling support.
    pub fn dump(&self) -> Vec<Job> {
        let jobs = self.jobs.read().unwrap();
        let mut rows: Vec<Job> = jobs.values().cloned().collect();
        rows.sort_by_key(|j| (j.submitted_at, j.id.0));
        rows
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, PersistenceError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(PersistenceError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, PersistenceError> {
        let jobs = self.jobs.read().unwrap();
        Ok(jobs.get(&job_id).cloned())
    }

    fn update(&self, job: &Job) -> Result<(), PersistenceError> {
        let mut jobs = self.jobs.write().unwrap();
        if !jobs.contains_key(&job.id) {
            return Err(PersistenceError::NotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<Job>, PersistenceError> {
        let mut jobs = self.jobs.write().unwrap();

        let next = jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Pending) && j.is_ready())
            .min_by_key(|j| (j.submitted_at, j.id.0))
            .map(|j| j.id);

        if let Some(job_id) = next {
            if let Some(job) = jobs.get_mut(&job_id) {
                job.mark_processing();
                return Ok(Some(job.clone()));
            }
        }

        Ok(None)
    }

    fn list_by_status(
        &self,
        status: &JobStatus,
        limit: usize,
    ) -> Result<Vec<Job>, PersistenceError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| std::mem::discriminant(&j.status) == std::mem::discriminant(status))
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.submitted_at, j.id.0));
        result.truncate(limit);
        Ok(result)
    }

    fn list_by_name(&self, name: &str, limit: usize) -> Result<Vec<Job>, PersistenceError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| j.name == name)
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.submitted_at, j.id.0));
        result.truncate(limit);
        Ok(result)
    }

    fn stats(&self) -> Result<JobStats, PersistenceError> {
        let jobs = self.jobs.read().unwrap();
        let mut stats = JobStats::default();

        for job in jobs.values() {
            match &job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => {
                    if job.is_permanently_failed() {
                        stats.permanently_failed += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
            }
        }

        Ok(stats)
    }
}
