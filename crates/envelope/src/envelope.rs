use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sealflow_core::{AggregateId, DomainError, DomainResult, Entity, TenantId};

use crate::recipient::{Recipient, RecipientId, SigningStatus};

/// Envelope identifier (tenant-scoped via the envelope's `tenant_id`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(pub AggregateId);

impl EnvelopeId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Envelope status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Draft,
    Pending,
    Completed,
    Rejected,
}

/// Outcome of [`Envelope::try_complete`].
///
/// `AlreadyCompleted` is a successful no-op, not an error: concurrent seal
/// attempts and reconciliation sweeps both depend on a second completion
/// being safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed,
    AlreadyCompleted,
}

/// The document container being routed for signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    id: EnvelopeId,
    tenant_id: TenantId,
    title: String,
    status: EnvelopeStatus,
    recipients: Vec<Recipient>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Envelope {
    /// Create a draft envelope.
    pub fn draft(
        id: EnvelopeId,
        tenant_id: TenantId,
        title: impl Into<String>,
        recipients: Vec<Recipient>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            title: title.into(),
            status: EnvelopeStatus::Draft,
            recipients,
            created_at: Utc::now(),
            completed_at: None,
            version: 0,
        }
    }

    pub fn id_typed(&self) -> EnvelopeId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> EnvelopeStatus {
        self.status
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn recipient_mut(&mut self, recipient_id: RecipientId) -> DomainResult<&mut Recipient> {
        self.recipients
            .iter_mut()
            .find(|r| *r.id() == recipient_id)
            .ok_or(DomainError::NotFound)
    }

    /// Send the envelope out for signing (Draft → Pending).
    ///
    /// Requires at least one signing-required recipient; an envelope nobody
    /// has to sign has nothing to wait for.
    pub fn send(&mut self) -> DomainResult<()> {
        if self.status != EnvelopeStatus::Draft {
            return Err(DomainError::conflict(format!(
                "cannot send envelope in status {:?}",
                self.status
            )));
        }
        if !self.recipients.iter().any(|r| r.role().requires_signature()) {
            return Err(DomainError::validation(
                "envelope has no signing-required recipients",
            ));
        }
        self.status = EnvelopeStatus::Pending;
        self.version += 1;
        Ok(())
    }

    /// Record a recipient's signature on a pending envelope.
    pub fn record_signature(
        &mut self,
        recipient_id: RecipientId,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        if self.status != EnvelopeStatus::Pending {
            return Err(DomainError::conflict(format!(
                "cannot sign envelope in status {:?}",
                self.status
            )));
        }
        self.recipient_mut(recipient_id)?.sign(at)?;
        self.version += 1;
        Ok(())
    }

    /// Record a recipient's rejection.
    ///
    /// A rejection by a signing-required recipient moves the whole envelope
    /// to Rejected; it can never complete afterwards.
    pub fn record_rejection(&mut self, recipient_id: RecipientId) -> DomainResult<()> {
        if self.status != EnvelopeStatus::Pending {
            return Err(DomainError::conflict(format!(
                "cannot reject envelope in status {:?}",
                self.status
            )));
        }
        let recipient = self.recipient_mut(recipient_id)?;
        let gates = recipient.role().requires_signature();
        recipient.decline()?;
        if gates {
            self.status = EnvelopeStatus::Rejected;
        }
        self.version += 1;
        Ok(())
    }

    /// The signing-required recipients that have not signed yet.
    pub fn pending_signatures(&self) -> Vec<&Recipient> {
        self.recipients
            .iter()
            .filter(|r| r.blocks_completion())
            .collect()
    }

    fn rejected_required(&self) -> Option<&Recipient> {
        self.recipients.iter().find(|r| {
            r.role().requires_signature() && r.signing_status() == SigningStatus::Rejected
        })
    }

    /// Whether every signing-required recipient has signed on a pending
    /// envelope. Cc/Viewer recipients never factor in.
    pub fn is_ready_to_seal(&self) -> bool {
        self.status == EnvelopeStatus::Pending
            && self.rejected_required().is_none()
            && self.pending_signatures().is_empty()
    }

    /// The completion transition.
    ///
    /// This is the only path to `Completed`. It succeeds from `Pending` when
    /// every signing-required recipient has signed, no-ops from `Completed`,
    /// and fails (without mutating) everywhere else.
    pub fn try_complete(&mut self, at: DateTime<Utc>) -> DomainResult<CompletionOutcome> {
        match self.status {
            EnvelopeStatus::Completed => Ok(CompletionOutcome::AlreadyCompleted),
            EnvelopeStatus::Draft => {
                Err(DomainError::conflict("envelope has not been sent for signing"))
            }
            EnvelopeStatus::Rejected => {
                Err(DomainError::conflict("envelope was rejected by a recipient"))
            }
            EnvelopeStatus::Pending => {
                if let Some(r) = self.rejected_required() {
                    return Err(DomainError::invariant(format!(
                        "recipient {} rejected the envelope",
                        r.email()
                    )));
                }
                let missing = self.pending_signatures();
                if !missing.is_empty() {
                    let emails: Vec<&str> = missing.iter().map(|r| r.email()).collect();
                    return Err(DomainError::invariant(format!(
                        "{} signature(s) outstanding: {}",
                        emails.len(),
                        emails.join(", ")
                    )));
                }
                self.status = EnvelopeStatus::Completed;
                self.completed_at = Some(at);
                self.version += 1;
                Ok(CompletionOutcome::Completed)
            }
        }
    }
}

impl Entity for Envelope {
    type Id = EnvelopeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
