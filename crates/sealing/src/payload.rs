//! The seal-document job payload.
//!
//! The wire shape is part of the platform contract: payloads are persisted
//! verbatim on the job row and replayed by the reconciler, so the camelCase
//! key layout must stay exactly as the original trigger writes it.

use serde::{Deserialize, Serialize};

use sealflow_envelope::EnvelopeId;
use sealflow_jobs::Job;

/// Job name the seal handler is registered under.
pub const SEAL_DOCUMENT_JOB: &str = "seal-document";

/// Where the triggering request came from; carried for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub ip_address: String,
    pub user_agent: String,
}

impl RequestMetadata {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Metadata for jobs triggered by background tooling rather than a
    /// user request.
    pub fn system(origin: &str) -> Self {
        Self {
            ip_address: "127.0.0.1".to_string(),
            user_agent: format!("sealflow/{origin}"),
        }
    }
}

/// Payload of a `seal-document` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealDocumentPayload {
    pub document_id: EnvelopeId,
    pub send_email: bool,
    pub request_metadata: RequestMetadata,
}

impl SealDocumentPayload {
    pub fn new(document_id: EnvelopeId, send_email: bool, request_metadata: RequestMetadata) -> Self {
        Self {
            document_id,
            send_email,
            request_metadata,
        }
    }

    /// The JSON stored on the job row.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("seal payload serialization is infallible")
    }

    /// Decode the payload carried by a job row.
    pub fn from_job(job: &Job) -> Result<Self, serde_json::Error> {
        serde_json::from_value(job.payload.clone())
    }
}
