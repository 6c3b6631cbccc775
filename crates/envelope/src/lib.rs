//! Envelope domain module.
//!
//! An **envelope** is the container being routed for signatures: a set of
//! recipients, each with a role and a signing status, plus the envelope's own
//! lifecycle status. This crate contains the business rules for that
//! lifecycle, implemented purely as deterministic domain logic (no IO, no
//! storage).
//!
//! The one transition the rest of the system leans on is
//! [`Envelope::try_complete`]: the precondition-checked move to `Completed`
//! that the seal handler and the reconciler both rely on for idempotency.

pub mod envelope;
pub mod recipient;

pub use envelope::{CompletionOutcome, Envelope, EnvelopeId, EnvelopeStatus};
pub use recipient::{Recipient, RecipientId, RecipientRole, SigningStatus};
