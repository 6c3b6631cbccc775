//! Document sealing: the completion workflow behind "everyone signed".
//!
//! Once the last required signature lands, a `seal-document` job finalizes
//! the envelope: re-check the precondition, flatten the PDF (best effort),
//! persist the sealed bytes, move the envelope to Completed, and notify the
//! parties. The [`reconcile`] module is the safety net for the cases where
//! that trigger was dropped and an envelope sits fully signed but still
//! Pending.
//!
//! Everything stateful sits behind traits ([`EnvelopeStore`],
//! [`DocumentFileStore`], [`CompletionNotifier`]); the production
//! implementations are external collaborators.

pub mod handler;
pub mod notify;
pub mod payload;
pub mod reconcile;
pub mod stores;


pub use handler::{SealDocumentHandler, SealError, SealOutcome};
pub use notify::{CompletionNotifier, LoggingNotifier, NotifyError, RecordingNotifier};
pub use payload::{RequestMetadata, SEAL_DOCUMENT_JOB, SealDocumentPayload};
pub use reconcile::{
    ReconcileError, ReconcileMode, ReconcileReport, StuckEnvelope, StuckEnvelopeReconciler,
};
pub use stores::{
    DocumentFileStore, EnvelopeStore, InMemoryDocumentStore, InMemoryEnvelopeStore, StoreError,
};
