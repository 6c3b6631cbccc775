use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sealflow_core::{AggregateId, DomainError, DomainResult, Entity};

/// Recipient identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub AggregateId);

impl RecipientId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Role a recipient plays in the signing workflow.
///
/// Signer, Approver and Assistant must act before an envelope can complete;
/// Cc and Viewer are informational and never block completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientRole {
    Signer,
    Approver,
    Assistant,
    Cc,
    Viewer,
}

impl RecipientRole {
    /// Whether this role's signature gates envelope completion.
    pub fn requires_signature(self) -> bool {
        matches!(self, Self::Signer | Self::Approver | Self::Assistant)
    }
}

/// Per-recipient signing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningStatus {
    NotSigned,
    Signed,
    Rejected,
}

/// A party attached to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    id: RecipientId,
    email: String,
    name: String,
    role: RecipientRole,
    signing_status: SigningStatus,
    signed_at: Option<DateTime<Utc>>,
}

impl Recipient {
    pub fn new(
        id: RecipientId,
        email: impl Into<String>,
        name: impl Into<String>,
        role: RecipientRole,
    ) -> Self {
        Self {
            id,
            email: email.into(),
            name: name.into(),
            role,
            signing_status: SigningStatus::NotSigned,
            signed_at: None,
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> RecipientRole {
        self.role
    }

    pub fn signing_status(&self) -> SigningStatus {
        self.signing_status
    }

    pub fn signed_at(&self) -> Option<DateTime<Utc>> {
        self.signed_at
    }

    /// Record this recipient's signature.
    ///
    /// Signed and Rejected are terminal; signing twice is a conflict, not a
    /// silent overwrite.
    pub fn sign(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        match self.signing_status {
            SigningStatus::NotSigned => {
                self.signing_status = SigningStatus::Signed;
                self.signed_at = Some(at);
                Ok(())
            }
            SigningStatus::Signed => Err(DomainError::conflict("recipient has already signed")),
            SigningStatus::Rejected => {
                Err(DomainError::conflict("recipient has rejected the envelope"))
            }
        }
    }

    /// Record this recipient's rejection.
    pub fn decline(&mut self) -> DomainResult<()> {
        match self.signing_status {
            SigningStatus::NotSigned => {
                self.signing_status = SigningStatus::Rejected;
                Ok(())
            }
            SigningStatus::Signed => Err(DomainError::conflict("recipient has already signed")),
            SigningStatus::Rejected => Ok(()),
        }
    }

    /// Whether this recipient currently stands between the envelope and
    /// completion.
    pub fn blocks_completion(&self) -> bool {
        self.role.requires_signature() && self.signing_status != SigningStatus::Signed
    }
}

impl Entity for Recipient {
    type Id = RecipientId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sealflow_core::AggregateId;

    fn recipient(role: RecipientRole) -> Recipient {
        Recipient::new(
            RecipientId::new(AggregateId::new()),
            "party@example.com",
            "Party",
            role,
        )
    }

    #[test]
    fn signing_roles_gate_completion() {
        assert!(RecipientRole::Signer.requires_signature());
        assert!(RecipientRole::Approver.requires_signature());
        assert!(RecipientRole::Assistant.requires_signature());
        assert!(!RecipientRole::Cc.requires_signature());
        assert!(!RecipientRole::Viewer.requires_signature());
    }

    #[test]
    fn unsigned_cc_never_blocks() {
        let r = recipient(RecipientRole::Cc);
        assert_eq!(r.signing_status(), SigningStatus::NotSigned);
        assert!(!r.blocks_completion());
    }

    #[test]
    fn unsigned_signer_blocks_until_signed() {
        let mut r = recipient(RecipientRole::Signer);
        assert!(r.blocks_completion());

        r.sign(Utc::now()).unwrap();
        assert_eq!(r.signing_status(), SigningStatus::Signed);
        assert!(r.signed_at().is_some());
        assert!(!r.blocks_completion());
    }

    #[test]
    fn signing_twice_is_a_conflict() {
        let mut r = recipient(RecipientRole::Signer);
        r.sign(Utc::now()).unwrap();
        let err = r.sign(Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn rejected_recipient_cannot_sign() {
        let mut r = recipient(RecipientRole::Approver);
        r.decline().unwrap();
        assert!(r.sign(Utc::now()).is_err());
        assert!(r.blocks_completion());
    }

    #[test]
    fn declining_twice_is_a_no_op() {
        let mut r = recipient(RecipientRole::Signer);
        r.decline().unwrap();
        r.decline().unwrap();
        assert_eq!(r.signing_status(), SigningStatus::Rejected);
    }
}
