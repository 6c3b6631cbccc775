//! Job dispatch: handler registry + enqueue.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::store::{JobStore, PersistenceError};
use super::types::{Job, JobId, JobOutcome};

/// A named job handler.
///
/// Handlers receive the whole row so they can read the payload and the retry
/// counters; they report an outcome rather than touching the store
/// themselves.
pub trait JobHandler: Send + Sync {
    /// The job name this handler is registered under.
    fn name(&self) -> &str;

    /// Execute one attempt.
    fn run(&self, job: &Job) -> JobOutcome;
}

/// Explicit handler registry, built once at process start and injected
/// wherever dispatch or execution happens.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under its own name. Last registration wins.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Dispatch failure.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No handler registered for the job name; fatal, not retried.
    #[error("no handler registered for job `{0}`")]
    Configuration(String),

    /// The store write failed; the caller must assume the job was never
    /// scheduled.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Enqueues named jobs for registered handlers.
pub struct JobDispatcher {
    store: Arc<dyn JobStore>,
    registry: Arc<HandlerRegistry>,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<HandlerRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Insert a Pending job row for `name` with `payload` stored verbatim.
    pub fn trigger(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> Result<JobId, DispatchError> {
        self.trigger_job(Job::new(name, payload))
    }

    /// Insert a pre-built job row (callers that need a custom retry cap).
    pub fn trigger_job(&self, job: Job) -> Result<JobId, DispatchError> {
        if !self.registry.contains(&job.name) {
            return Err(DispatchError::Configuration(job.name));
        }
        let name = job.name.clone();
        let job_id = self.store.enqueue(job)?;
        info!(%job_id, job = %name, "job enqueued");
        Ok(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryJobStore;
    use crate::types::{JobStatus, TaskRecord};

    struct NoopHandler(&'static str);

    impl JobHandler for NoopHandler {
        fn name(&self) -> &str {
            self.0
        }

        fn run(&self, _job: &Job) -> JobOutcome {
            JobOutcome::success(vec![TaskRecord::completed("noop")])
        }
    }

    fn registry_with(names: &[&'static str]) -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        for name in names {
            registry.register(Arc::new(NoopHandler(name)));
        }
        Arc::new(registry)
    }

    #[test]
    fn triggering_an_unknown_name_is_a_configuration_error() {
        let dispatcher = JobDispatcher::new(InMemoryJobStore::arc(), registry_with(&[]));
        let err = dispatcher
            .trigger("seal-document", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(name) if name == "seal-document"));
    }

    #[test]
    fn triggering_inserts_a_pending_row_with_the_payload_verbatim() {
        let store = InMemoryJobStore::arc();
        let dispatcher =
            JobDispatcher::new(store.clone(), registry_with(&["seal-document"]));

        let payload = serde_json::json!({
            "documentId": "d-1",
            "sendEmail": false,
            "requestMetadata": {"ipAddress": "127.0.0.1", "userAgent": "test"},
        });
        let job_id = dispatcher.trigger("seal-document", payload.clone()).unwrap();

        let row = store.get(job_id).unwrap().unwrap();
        assert_eq!(row.status, JobStatus::Pending);
        assert_eq!(row.payload, payload);
        assert_eq!(row.name, "seal-document");
    }

    #[test]
    fn registry_lists_names_sorted() {
        let registry = registry_with(&["b-job", "a-job"]);
        assert_eq!(registry.names(), vec!["a-job", "b-job"]);
    }
}
