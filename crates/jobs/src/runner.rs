//! Job runner: claims Pending jobs and executes attempts.
//!
//! Execution happens on the runner's own thread, never on a request-serving
//! one; the seal handler's PDF work is CPU-bound. One attempt runs at a time
//! per claimed job, and a job that enters Processing runs to completion or
//! failure (no cancellation).

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::dispatcher::HandlerRegistry;
use super::store::{JobStore, PersistenceError};
use super::types::{Job, JobOutcome, RetryPolicy};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How often to poll for claimable jobs.
    pub poll_interval: Duration,
    /// Backoff shape for resubmissions.
    pub retry_policy: RetryPolicy,
    /// Name for logging.
    pub name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            retry_policy: RetryPolicy::default(),
            name: "job-runner".to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Runner runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunnerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_resubmitted: u64,
    pub uptime_secs: u64,
}

/// Handle to control a spawned runner.
#[derive(Debug)]
pub struct RunnerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<RunnerStats>>,
}

impl RunnerHandle {
    /// Request graceful shutdown and wait for the loop to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> RunnerStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Claims and executes jobs against a store, routing through a registry.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
    retry_policy: RetryPolicy,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            registry,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Claim and execute ready jobs until the store has none left.
    ///
    /// Returns the number of attempts executed. Resubmitted jobs whose
    /// backoff gate is still closed are left for a later pass.
    pub fn run_ready(&self) -> Result<usize, PersistenceError> {
        let mut processed = 0;
        while let Some(mut job) = self.store.claim_next()? {
            self.execute(&mut job)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Execute one claimed (Processing) job attempt.
    pub fn execute(&self, job: &mut Job) -> Result<(), PersistenceError> {
        let Some(handler) = self.registry.get(&job.name) else {
            // Dispatch-time validation makes this unreachable in one
            // process, but the registry may differ across deployments.
            let message = format!("no handler registered for job `{}`", job.name);
            warn!(job_id = %job.id, job = %job.name, "{message}");
            job.mark_failed(&message, false, Vec::new());
            self.store.update(job)?;
            return Ok(());
        };

        debug!(job_id = %job.id, job = %job.name, retried = job.retried, "executing job");
        let outcome = handler.run(job);

        match outcome {
            JobOutcome::Completed { tasks } => {
                job.mark_completed(tasks);
                self.store.update(job)?;
                debug!(job_id = %job.id, "job completed");
            }
            JobOutcome::Failed {
                error: job_error,
                retriable,
                tasks,
            } => {
                job.mark_failed(&job_error, retriable, tasks);
                self.store.update(job)?;

                if job.can_resubmit() {
                    let delay = self.retry_policy.delay_for_retry(job.retried + 1);
                    job.resubmit(delay);
                    self.store.update(job)?;
                    info!(
                        job_id = %job.id,
                        retried = job.retried,
                        max_retries = job.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %job_error,
                        "job failed; resubmitted"
                    );
                } else if retriable {
                    error!(
                        job_id = %job.id,
                        retried = job.retried,
                        error = %job_error,
                        "job failed permanently after exhausting retries; operator intervention required"
                    );
                } else {
                    error!(
                        job_id = %job.id,
                        error = %job_error,
                        "job failed with a non-retriable error; operator intervention required"
                    );
                }
            }
        }

        Ok(())
    }

    /// Spawn the polling loop on a dedicated thread.
    pub fn spawn(self, config: RunnerConfig) -> RunnerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(RunnerStats::default()));
        let stats_clone = stats.clone();

        let name = config.name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || runner_loop(self, config, shutdown_rx, stats_clone))
            .expect("failed to spawn job runner thread");

        RunnerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }
}

fn runner_loop(
    runner: JobRunner,
    config: RunnerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<RunnerStats>>,
) {
    info!(runner = %config.name, "job runner started");
    let runner = JobRunner {
        retry_policy: config.retry_policy.clone(),
        ..runner
    };
    let start_time = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        {
            let mut s = stats.lock().unwrap();
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        match runner.store.claim_next() {
            Ok(Some(mut job)) => {
                let result = runner.execute(&mut job);
                let mut s = stats.lock().unwrap();
                s.jobs_processed += 1;
                match (&result, &job.status) {
                    (Ok(()), super::types::JobStatus::Completed) => s.jobs_succeeded += 1,
                    (Ok(()), super::types::JobStatus::Pending) => s.jobs_resubmitted += 1,
                    _ => s.jobs_failed += 1,
                }
                if let Err(e) = result {
                    error!(runner = %config.name, job_id = %job.id, error = %e, "store update failed");
                }
            }
            Ok(None) => thread::sleep(config.poll_interval),
            Err(e) => {
                error!(runner = %config.name, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(runner = %config.name, "job runner stopped");
}
