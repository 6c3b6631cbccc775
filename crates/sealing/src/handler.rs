//! The seal-document job handler.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use sealflow_envelope::{CompletionOutcome, Envelope, EnvelopeId, EnvelopeStatus};
use sealflow_jobs::{Job, JobHandler, JobOutcome, TaskRecord};
use sealflow_pdf::{Normalized, PdfError, normalize};

use crate::notify::CompletionNotifier;
use crate::payload::{SEAL_DOCUMENT_JOB, SealDocumentPayload};
use crate::stores::{DocumentFileStore, EnvelopeStore, StoreError};

/// Task names recorded on the job row, in execution order.
const TASK_NORMALIZE: &str = "normalize-pdf";
const TASK_COMPLETE: &str = "complete-envelope";
const TASK_NOTIFY: &str = "notify-recipients";

/// Seal failure.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("envelope not found: {0}")]
    EnvelopeNotFound(EnvelopeId),

    /// The completion precondition does not hold. This means the trigger
    /// fired prematurely (a caller bug) and retrying cannot succeed.
    #[error("envelope {envelope_id} is not ready to seal: {detail}")]
    PreconditionFailed {
        envelope_id: EnvelopeId,
        detail: String,
    },

    /// The uploaded PDF is structurally invalid or encrypted. Requires the
    /// document to be re-uploaded; retrying cannot succeed.
    #[error("invalid document file for envelope {0}: {1}")]
    InvalidDocumentFile(EnvelopeId, PdfError),

    /// Store failure; worth retrying.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SealError {
    /// Only transient store failures are worth resubmitting.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SealError::Store(_))
    }
}

/// What a seal attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealOutcome {
    /// The envelope was sealed by this attempt. `degraded` marks that the
    /// PDF could not be flattened and the original bytes were used.
    Sealed { degraded: bool },
    /// Someone else already completed the envelope; this attempt no-opped.
    AlreadyCompleted,
}

/// Seals a fully-signed envelope: verify, flatten, persist, complete,
/// notify.
pub struct SealDocumentHandler {
    envelopes: Arc<dyn EnvelopeStore>,
    files: Arc<dyn DocumentFileStore>,
    notifier: Arc<dyn CompletionNotifier>,
}

impl SealDocumentHandler {
    pub fn new(
        envelopes: Arc<dyn EnvelopeStore>,
        files: Arc<dyn DocumentFileStore>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        Self {
            envelopes,
            files,
            notifier,
        }
    }

    /// Run one seal attempt.
    ///
    /// Task records for the sub-steps that ran are appended to `tasks`
    /// whether or not the attempt succeeds.
    pub fn seal(
        &self,
        request: &SealDocumentPayload,
        tasks: &mut Vec<TaskRecord>,
    ) -> Result<SealOutcome, SealError> {
        let envelope_id = request.document_id;

        let envelope = self
            .envelopes
            .get(envelope_id)?
            .ok_or(SealError::EnvelopeNotFound(envelope_id))?;

        // Tolerate races with concurrent sealing and with reconciliation:
        // an already-completed envelope is a successful no-op.
        if envelope.status() == EnvelopeStatus::Completed {
            info!(%envelope_id, "envelope already completed; nothing to seal");
            return Ok(SealOutcome::AlreadyCompleted);
        }

        self.check_precondition(&envelope)?;

        let source = self.files.load_source(envelope_id)?;
        let (sealed_bytes, degraded) = match normalize(&source) {
            Ok(Normalized::Flattened(bytes)) => {
                tasks.push(TaskRecord::completed(TASK_NORMALIZE));
                (bytes, false)
            }
            Ok(Normalized::Degraded { bytes, reason }) => {
                warn!(%envelope_id, %reason, "pdf not flattened; sealing original bytes");
                tasks.push(TaskRecord::failed(TASK_NORMALIZE, reason));
                (bytes, true)
            }
            Err(error) => {
                tasks.push(TaskRecord::failed(TASK_NORMALIZE, error.to_string()));
                return Err(SealError::InvalidDocumentFile(envelope_id, error));
            }
        };

        self.files.store_sealed(envelope_id, &sealed_bytes)?;

        let outcome = match self.envelopes.complete(envelope_id, Utc::now()) {
            Ok(outcome) => {
                tasks.push(TaskRecord::completed(TASK_COMPLETE));
                outcome
            }
            Err(error) => {
                tasks.push(TaskRecord::failed(TASK_COMPLETE, error.to_string()));
                return Err(error.into());
            }
        };

        if outcome == CompletionOutcome::AlreadyCompleted {
            // A concurrent attempt won the completion race; it owns the
            // notification too.
            info!(%envelope_id, "envelope completed concurrently; skipping notification");
            return Ok(SealOutcome::AlreadyCompleted);
        }

        info!(%envelope_id, degraded, "envelope sealed");

        if request.send_email {
            match self.notifier.envelope_completed(&envelope) {
                Ok(()) => tasks.push(TaskRecord::completed(TASK_NOTIFY)),
                Err(error) => {
                    // The legal completion event stands; a failed email is
                    // reported separately, never rolled into the job result.
                    warn!(%envelope_id, %error, "completion notification failed");
                    tasks.push(TaskRecord::failed(TASK_NOTIFY, error.to_string()));
                }
            }
        }

        Ok(SealOutcome::Sealed { degraded })
    }

    fn check_precondition(&self, envelope: &Envelope) -> Result<(), SealError> {
        let envelope_id = envelope.id_typed();
        let detail = match envelope.status() {
            EnvelopeStatus::Draft => Some("envelope has not been sent for signing".to_string()),
            EnvelopeStatus::Rejected => {
                Some("envelope was rejected by a recipient".to_string())
            }
            EnvelopeStatus::Pending => {
                let missing = envelope.pending_signatures();
                if missing.is_empty() {
                    None
                } else {
                    let emails: Vec<&str> = missing.iter().map(|r| r.email()).collect();
                    Some(format!(
                        "{} required signature(s) outstanding: {}",
                        emails.len(),
                        emails.join(", ")
                    ))
                }
            }
            EnvelopeStatus::Completed => None,
        };

        match detail {
            None => Ok(()),
            Some(detail) => {
                // A premature seal means the trigger fired on an unsigned
                // envelope; that is a caller bug worth shouting about.
                error!(%envelope_id, %detail, "seal precondition failed");
                Err(SealError::PreconditionFailed {
                    envelope_id,
                    detail,
                })
            }
        }
    }
}

impl JobHandler for SealDocumentHandler {
    fn name(&self) -> &str {
        SEAL_DOCUMENT_JOB
    }

    fn run(&self, job: &Job) -> JobOutcome {
        let payload = match SealDocumentPayload::from_job(job) {
            Ok(payload) => payload,
            Err(error) => {
                return JobOutcome::failure(
                    format!("malformed seal payload: {error}"),
                    false,
                    Vec::new(),
                );
            }
        };

        let mut tasks = Vec::new();
        match self.seal(&payload, &mut tasks) {
            Ok(_) => JobOutcome::success(tasks),
            Err(error) => JobOutcome::failure(error.to_string(), error.is_retriable(), tasks),
        }
    }
}
