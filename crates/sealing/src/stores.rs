//! Envelope and document-file persistence boundaries.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use sealflow_core::DomainError;
use sealflow_envelope::{CompletionOutcome, Envelope, EnvelopeId, EnvelopeStatus};

/// Envelope/document store failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("envelope not found: {0}")]
    EnvelopeNotFound(EnvelopeId),

    #[error("no document file for envelope {0}")]
    FileNotFound(EnvelopeId),

    /// Completion was attempted against an envelope state that forbids it.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage error: {0}")]
    Backend(String),
}

/// Envelope persistence boundary.
///
/// `complete` is the only write path to `Completed` and must be atomic with
/// respect to concurrent callers: exactly one of two racing completions
/// observes [`CompletionOutcome::Completed`].
pub trait EnvelopeStore: Send + Sync {
    fn get(&self, id: EnvelopeId) -> Result<Option<Envelope>, StoreError>;

    /// Upsert an envelope row (signing flows, seeding).
    fn put(&self, envelope: Envelope) -> Result<(), StoreError>;

    /// Envelopes currently in `status`, oldest first.
    fn list_by_status(&self, status: EnvelopeStatus) -> Result<Vec<Envelope>, StoreError>;

    /// Run the envelope's completion transition and persist the result.
    fn complete(&self, id: EnvelopeId, at: DateTime<Utc>)
    -> Result<CompletionOutcome, StoreError>;
}

/// Document byte storage boundary (source uploads and sealed outputs).
pub trait DocumentFileStore: Send + Sync {
    fn load_source(&self, id: EnvelopeId) -> Result<Vec<u8>, StoreError>;

    fn store_sealed(&self, id: EnvelopeId, bytes: &[u8]) -> Result<(), StoreError>;

    fn load_sealed(&self, id: EnvelopeId) -> Result<Option<Vec<u8>>, StoreError>;
}

/// In-memory envelope store for tests, tooling and dev.
#[derive(Debug, Default)]
pub struct InMemoryEnvelopeStore {
    envelopes: RwLock<HashMap<EnvelopeId, Envelope>>,
}

impl InMemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot every envelope, oldest first. Tooling support.
    pub fn dump(&self) -> Vec<Envelope> {
        let envelopes = self.envelopes.read().unwrap();
        let mut rows: Vec<Envelope> = envelopes.values().cloned().collect();
        rows.sort_by_key(|e| (e.created_at(), e.id_typed()));
        rows
    }
}

impl EnvelopeStore for InMemoryEnvelopeStore {
    fn get(&self, id: EnvelopeId) -> Result<Option<Envelope>, StoreError> {
        let envelopes = self.envelopes.read().unwrap();
        Ok(envelopes.get(&id).cloned())
    }

    fn put(&self, envelope: Envelope) -> Result<(), StoreError> {
        let mut envelopes = self.envelopes.write().unwrap();
        envelopes.insert(envelope.id_typed(), envelope);
        Ok(())
    }

    fn list_by_status(&self, status: EnvelopeStatus) -> Result<Vec<Envelope>, StoreError> {
        let envelopes = self.envelopes.read().unwrap();
        let mut rows: Vec<Envelope> = envelopes
            .values()
            .filter(|e| e.status() == status)
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.created_at(), e.id_typed()));
        Ok(rows)
    }

    fn complete(
        &self,
        id: EnvelopeId,
        at: DateTime<Utc>,
    ) -> Result<CompletionOutcome, StoreError> {
        let mut envelopes = self.envelopes.write().unwrap();
        let envelope = envelopes
            .get_mut(&id)
            .ok_or(StoreError::EnvelopeNotFound(id))?;
        Ok(envelope.try_complete(at)?)
    }
}

/// In-memory document file store.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    sources: RwLock<HashMap<EnvelopeId, Vec<u8>>>,
    sealed: RwLock<HashMap<EnvelopeId, Vec<u8>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Seed the source bytes for an envelope (upload stand-in).
    pub fn seed_source(&self, id: EnvelopeId, bytes: Vec<u8>) {
        self.sources.write().unwrap().insert(id, bytes);
    }
}

impl DocumentFileStore for InMemoryDocumentStore {
    fn load_source(&self, id: EnvelopeId) -> Result<Vec<u8>, StoreError> {
        let sources = self.sources.read().unwrap();
        sources.get(&id).cloned().ok_or(StoreError::FileNotFound(id))
    }

    fn store_sealed(&self, id: EnvelopeId, bytes: &[u8]) -> Result<(), StoreError> {
        self.sealed.write().unwrap().insert(id, bytes.to_vec());
        Ok(())
    }

    fn load_sealed(&self, id: EnvelopeId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.sealed.read().unwrap().get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sealflow_core::{AggregateId, Entity, TenantId};
    use sealflow_envelope::{Recipient, RecipientId, RecipientRole};

    fn signed_pending_envelope() -> Envelope {
        let recipient = Recipient::new(
            RecipientId::new(AggregateId::new()),
            "signer@example.com",
            "Signer",
            RecipientRole::Signer,
        );
        let mut envelope = Envelope::draft(
            EnvelopeId::new(AggregateId::new()),
            TenantId::new(),
            "Lease",
            vec![recipient],
        );
        envelope.send().unwrap();
        let id = *envelope.recipients()[0].id();
        envelope.record_signature(id, Utc::now()).unwrap();
        envelope
    }

    #[test]
    fn complete_is_the_transition_and_persists() {
        let store = InMemoryEnvelopeStore::new();
        let envelope = signed_pending_envelope();
        let id = envelope.id_typed();
        store.put(envelope).unwrap();

        assert_eq!(
            store.complete(id, Utc::now()).unwrap(),
            CompletionOutcome::Completed
        );
        assert_eq!(
            store.get(id).unwrap().unwrap().status(),
            EnvelopeStatus::Completed
        );

        // Idempotent on the second call.
        assert_eq!(
            store.complete(id, Utc::now()).unwrap(),
            CompletionOutcome::AlreadyCompleted
        );
    }

    #[test]
    fn completing_a_missing_envelope_is_not_found() {
        let store = InMemoryEnvelopeStore::new();
        let id = EnvelopeId::new(AggregateId::new());
        assert!(matches!(
            store.complete(id, Utc::now()),
            Err(StoreError::EnvelopeNotFound(_))
        ));
    }

    #[test]
    fn file_store_separates_source_and_sealed() {
        let store = InMemoryDocumentStore::new();
        let id = EnvelopeId::new(AggregateId::new());

        assert!(matches!(
            store.load_source(id),
            Err(StoreError::FileNotFound(_))
        ));

        store.seed_source(id, b"%PDF-1.4 source".to_vec());
        assert_eq!(store.load_source(id).unwrap(), b"%PDF-1.4 source");
        assert_eq!(store.load_sealed(id).unwrap(), None);

        store.store_sealed(id, b"%PDF-1.4 sealed").unwrap();
        assert_eq!(
            store.load_sealed(id).unwrap().unwrap(),
            b"%PDF-1.4 sealed"
        );
    }
}
