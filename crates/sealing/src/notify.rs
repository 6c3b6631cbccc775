//! Completion notification boundary.
//!
//! The mailer is an external collaborator. Delivery failure never affects
//! the envelope's completion: all parties signed and the document is
//! sealed, and a bounced email must not undo that.

use std::sync::Mutex;

use tracing::info;

use sealflow_envelope::{Envelope, EnvelopeId};

/// Notification failure.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound "document completed" notification.
pub trait CompletionNotifier: Send + Sync {
    fn envelope_completed(&self, envelope: &Envelope) -> Result<(), NotifyError>;
}

/// Notifier that only logs; used by tooling where no mailer is wired.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl CompletionNotifier for LoggingNotifier {
    fn envelope_completed(&self, envelope: &Envelope) -> Result<(), NotifyError> {
        info!(
            envelope_id = %envelope.id_typed(),
            recipients = envelope.recipients().len(),
            "completion notification (log only)"
        );
        Ok(())
    }
}

/// Notifier that records which envelopes it was asked about. Test support,
/// also handy for dry-run tooling.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<EnvelopeId>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<EnvelopeId> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl CompletionNotifier for RecordingNotifier {
    fn envelope_completed(&self, envelope: &Envelope) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(envelope.id_typed());
        Ok(())
    }
}
