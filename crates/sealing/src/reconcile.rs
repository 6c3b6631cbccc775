//! Stuck-envelope reconciliation.
//!
//! The completion trigger can be silently dropped, leaving an envelope
//! whose required recipients have all signed but whose status never
//! advanced. The reconciler finds those envelopes and re-fires the same
//! `seal-document` job the original trigger would have enqueued. It is safe
//! to run alongside live signing activity: the handler re-validates before
//! mutating anything and no-ops on envelopes that complete in the meantime.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use sealflow_core::TenantId;
use sealflow_envelope::{EnvelopeId, EnvelopeStatus};
use sealflow_jobs::{DispatchError, JobDispatcher, JobId};

use crate::payload::{RequestMetadata, SEAL_DOCUMENT_JOB, SealDocumentPayload};
use crate::stores::{EnvelopeStore, StoreError};

/// Reconciliation failure.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Whether to report or actually re-trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    DryRun,
    Execute,
}

/// A pending envelope whose required signatures are all in.
#[derive(Debug, Clone, Serialize)]
pub struct StuckEnvelope {
    pub envelope_id: EnvelopeId,
    pub tenant_id: TenantId,
    pub title: String,
    /// Recipients whose signatures gated completion (all signed).
    pub required_recipients: usize,
    /// Cc/Viewer recipients, irrelevant to completion.
    pub exempt_recipients: usize,
}

/// Result of one reconciliation sweep.
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    /// Pending envelopes examined.
    pub scanned: usize,
    pub stuck: Vec<StuckEnvelope>,
    /// Jobs enqueued (Execute mode only).
    pub triggered: Vec<JobId>,
}

/// Offline sweep that re-triggers sealing for stuck envelopes.
pub struct StuckEnvelopeReconciler {
    envelopes: Arc<dyn EnvelopeStore>,
    dispatcher: Arc<JobDispatcher>,
}

impl StuckEnvelopeReconciler {
    pub fn new(envelopes: Arc<dyn EnvelopeStore>, dispatcher: Arc<JobDispatcher>) -> Self {
        Self {
            envelopes,
            dispatcher,
        }
    }

    /// Find stuck envelopes: Pending, every signing-required recipient
    /// Signed. Cc/Viewer recipients never hold an envelope back.
    ///
    /// Reads a point-in-time snapshot; statuses may move underneath a
    /// concurrent sweep, which is fine because the seal handler re-checks.
    pub fn find_stuck(
        &self,
        tenant: Option<TenantId>,
    ) -> Result<(usize, Vec<StuckEnvelope>), StoreError> {
        let pending = self.envelopes.list_by_status(EnvelopeStatus::Pending)?;
        let scanned = pending.len();

        let stuck = pending
            .into_iter()
            .filter(|envelope| tenant.is_none_or(|t| envelope.tenant_id() == t))
            .filter(|envelope| envelope.is_ready_to_seal())
            .map(|envelope| {
                let required = envelope
                    .recipients()
                    .iter()
                    .filter(|r| r.role().requires_signature())
                    .count();
                StuckEnvelope {
                    envelope_id: envelope.id_typed(),
                    tenant_id: envelope.tenant_id(),
                    title: envelope.title().to_string(),
                    required_recipients: required,
                    exempt_recipients: envelope.recipients().len() - required,
                }
            })
            .collect();

        Ok((scanned, stuck))
    }

    /// Sweep and, in Execute mode, re-enqueue the seal job for every stuck
    /// envelope with the same payload shape the original trigger uses.
    pub fn reconcile(
        &self,
        mode: ReconcileMode,
        send_email: bool,
        tenant: Option<TenantId>,
    ) -> Result<ReconcileReport, ReconcileError> {
        let (scanned, stuck) = self.find_stuck(tenant)?;
        let mut report = ReconcileReport {
            scanned,
            stuck,
            triggered: Vec::new(),
        };

        if report.stuck.is_empty() {
            info!(scanned, "no stuck envelopes found");
            return Ok(report);
        }

        for entry in &report.stuck {
            warn!(
                envelope_id = %entry.envelope_id,
                title = %entry.title,
                "stuck envelope: all required signatures present but still pending"
            );
        }

        if mode == ReconcileMode::Execute {
            for entry in &report.stuck {
                let payload = SealDocumentPayload::new(
                    entry.envelope_id,
                    send_email,
                    RequestMetadata::system("reconciler"),
                );
                let job_id = self
                    .dispatcher
                    .trigger(SEAL_DOCUMENT_JOB, payload.to_value())?;
                info!(envelope_id = %entry.envelope_id, %job_id, "re-triggered seal job");
                report.triggered.push(job_id);
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SealDocumentHandler;
    use crate::notify::RecordingNotifier;
    use crate::stores::{InMemoryDocumentStore, InMemoryEnvelopeStore};
    use chrono::Utc;
    use sealflow_core::{AggregateId, Entity};
    use sealflow_envelope::{Envelope, Recipient, RecipientId, RecipientRole};
    use sealflow_jobs::{HandlerRegistry, InMemoryJobStore, JobStore};

    fn recipient(email: &str, role: RecipientRole) -> Recipient {
        Recipient::new(RecipientId::new(AggregateId::new()), email, email, role)
    }

    /// Pending envelope; `signed` controls which signing-required
    /// recipients have signed (by index among required ones).
    fn pending(title: &str, recipients: Vec<Recipient>, sign_required: bool) -> Envelope {
        let mut envelope = Envelope::draft(
            EnvelopeId::new(AggregateId::new()),
            TenantId::new(),
            title,
            recipients,
        );
        envelope.send().unwrap();
        if sign_required {
            let ids: Vec<RecipientId> = envelope
                .recipients()
                .iter()
                .filter(|r| r.role().requires_signature())
                .map(|r| *r.id())
                .collect();
            for id in ids {
                envelope.record_signature(id, Utc::now()).unwrap();
            }
        }
        envelope
    }

    fn reconciler(
        envelopes: Arc<InMemoryEnvelopeStore>,
    ) -> (StuckEnvelopeReconciler, Arc<InMemoryJobStore>) {
        let job_store = InMemoryJobStore::arc();
        let files = InMemoryDocumentStore::arc();
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(SealDocumentHandler::new(
            envelopes.clone(),
            files,
            Arc::new(RecordingNotifier::new()),
        )));
        let dispatcher = Arc::new(JobDispatcher::new(job_store.clone(), Arc::new(registry)));
        (
            StuckEnvelopeReconciler::new(envelopes, dispatcher),
            job_store,
        )
    }

    #[test]
    fn flags_fully_signed_envelopes_and_ignores_cc_holdouts() {
        let envelopes = InMemoryEnvelopeStore::arc();

        // A: all signers signed -> stuck.
        let a = pending(
            "A",
            vec![
                recipient("a1@example.com", RecipientRole::Signer),
                recipient("a2@example.com", RecipientRole::Signer),
            ],
            true,
        );
        // B: one signer outstanding -> not stuck.
        let b = pending(
            "B",
            vec![
                recipient("b1@example.com", RecipientRole::Signer),
                recipient("b2@example.com", RecipientRole::Signer),
            ],
            false,
        );
        // C: signers signed, a CC recipient never will -> stuck anyway.
        let c = pending(
            "C",
            vec![
                recipient("c1@example.com", RecipientRole::Signer),
                recipient("c-cc@example.com", RecipientRole::Cc),
            ],
            true,
        );

        let (a_id, c_id) = (a.id_typed(), c.id_typed());
        for envelope in [a, b, c] {
            envelopes.put(envelope).unwrap();
        }

        let (reconciler, _) = reconciler(envelopes);
        let (scanned, stuck) = reconciler.find_stuck(None).unwrap();

        assert_eq!(scanned, 3);
        let mut ids: Vec<EnvelopeId> = stuck.iter().map(|s| s.envelope_id).collect();
        ids.sort();
        let mut expected = vec![a_id, c_id];
        expected.sort();
        assert_eq!(ids, expected);

        let c_entry = stuck.iter().find(|s| s.envelope_id == c_id).unwrap();
        assert_eq!(c_entry.required_recipients, 1);
        assert_eq!(c_entry.exempt_recipients, 1);
    }

    #[test]
    fn completed_and_rejected_envelopes_are_not_scanned_as_stuck() {
        let envelopes = InMemoryEnvelopeStore::arc();

        let mut done = pending(
            "done",
            vec![recipient("d@example.com", RecipientRole::Signer)],
            true,
        );
        done.try_complete(Utc::now()).unwrap();

        let mut rejected = pending(
            "rejected",
            vec![recipient("r@example.com", RecipientRole::Signer)],
            false,
        );
        let rid = *rejected.recipients()[0].id();
        rejected.record_rejection(rid).unwrap();

        for envelope in [done, rejected] {
            envelopes.put(envelope).unwrap();
        }

        let (reconciler, _) = reconciler(envelopes);
        let (scanned, stuck) = reconciler.find_stuck(None).unwrap();
        assert_eq!(scanned, 0);
        assert!(stuck.is_empty());
    }

    #[test]
    fn dry_run_reports_without_enqueueing() {
        let envelopes = InMemoryEnvelopeStore::arc();
        envelopes
            .put(pending(
                "stuck",
                vec![recipient("s@example.com", RecipientRole::Signer)],
                true,
            ))
            .unwrap();

        let (reconciler, job_store) = reconciler(envelopes);
        let report = reconciler
            .reconcile(ReconcileMode::DryRun, true, None)
            .unwrap();

        assert_eq!(report.stuck.len(), 1);
        assert!(report.triggered.is_empty());
        assert_eq!(job_store.stats().unwrap().pending, 0);
    }

    #[test]
    fn execute_enqueues_the_original_payload_shape() {
        let envelopes = InMemoryEnvelopeStore::arc();
        let envelope = pending(
            "stuck",
            vec![recipient("s@example.com", RecipientRole::Signer)],
            true,
        );
        let envelope_id = envelope.id_typed();
        envelopes.put(envelope).unwrap();

        let (reconciler, job_store) = reconciler(envelopes);
        let report = reconciler
            .reconcile(ReconcileMode::Execute, true, None)
            .unwrap();

        assert_eq!(report.triggered.len(), 1);
        let job = job_store.get(report.triggered[0]).unwrap().unwrap();
        assert_eq!(job.name, SEAL_DOCUMENT_JOB);
        assert_eq!(
            job.payload["documentId"],
            serde_json::json!(envelope_id.to_string())
        );
        assert_eq!(job.payload["sendEmail"], serde_json::json!(true));
        assert!(job.payload["requestMetadata"]["userAgent"]
            .as_str()
            .unwrap()
            .contains("reconciler"));
    }

    #[test]
    fn tenant_scoped_sweeps_skip_other_tenants() {
        let envelopes = InMemoryEnvelopeStore::arc();
        let envelope = pending(
            "stuck",
            vec![recipient("s@example.com", RecipientRole::Signer)],
            true,
        );
        let tenant = envelope.tenant_id();
        envelopes.put(envelope).unwrap();

        let (reconciler, _) = reconciler(envelopes);

        let (_, stuck) = reconciler.find_stuck(Some(TenantId::new())).unwrap();
        assert!(stuck.is_empty());

        let (_, stuck) = reconciler.find_stuck(Some(tenant)).unwrap();
        assert_eq!(stuck.len(), 1);
    }
}
