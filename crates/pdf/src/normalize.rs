//! Normalization entry point.

use tracing::{debug, warn};

use crate::document::Document;
use crate::error::PdfError;
use crate::flatten::flatten;
use crate::writer::serialize;

/// Default input size cap.
pub const DEFAULT_SIZE_LIMIT: usize = 100 * 1024 * 1024;

/// Outcome of a successful normalization call.
///
/// Flattening is cosmetic: a signed document that fails to flatten is still
/// legally valid, so that path hands back the caller's original bytes
/// untouched rather than failing the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// The document was flattened and rewritten.
    Flattened(Vec<u8>),
    /// Flattening failed after a valid parse; `bytes` are the input,
    /// byte for byte.
    Degraded { bytes: Vec<u8>, reason: String },
}

impl Normalized {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Normalized::Flattened(bytes) => bytes,
            Normalized::Degraded { bytes, .. } => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Normalized::Flattened(bytes) => bytes,
            Normalized::Degraded { bytes, .. } => bytes,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Normalized::Degraded { .. })
    }
}

/// Normalize a PDF with the default size limit.
pub fn normalize(data: &[u8]) -> Result<Normalized, PdfError> {
    normalize_with_limit(data, DEFAULT_SIZE_LIMIT)
}

/// Normalize a PDF: parse, flatten, re-serialize.
///
/// Structurally invalid, oversized, or encrypted input is a hard error.
/// Everything after a valid parse is best-effort.
pub fn normalize_with_limit(data: &[u8], limit: usize) -> Result<Normalized, PdfError> {
    let mut doc = Document::parse_with_limit(data, limit)?;

    match flatten(&mut doc) {
        Ok(summary) => {
            debug!(
                pages = summary.pages,
                stamped = summary.stamped_annotations,
                dropped = summary.dropped_annotations,
                "normalized pdf"
            );
            Ok(Normalized::Flattened(serialize(&doc)))
        }
        Err(error) => {
            warn!(%error, "pdf flattening failed; keeping original bytes");
            Ok(Normalized::Degraded {
                bytes: data.to_vec(),
                reason: error.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Classic single-page PDF with a widget annotation and an AcroForm.
    /// Offsets in the xref are deliberately lax; parsing scans objects.
    fn interactive_pdf() -> Vec<u8> {
        let mut body = String::new();
        body.push_str("%PDF-1.7\n");
        body.push_str("1 0 obj\n<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [5 0 R] >> >>\nendobj\n");
        body.push_str("2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
        body.push_str(
            "3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Annots [5 0 R] >>\nendobj\n",
        );
        body.push_str("4 0 obj\n<< /Length 5 >>\nstream\nBT ET\nendstream\nendobj\n");
        body.push_str(
            "5 0 obj\n<< /Type /Annot /Subtype /Widget /Rect [100 100 300 200] /AP << /N 6 0 R >> >>\nendobj\n",
        );
        body.push_str(
            "6 0 obj\n<< /BBox [0 0 200 100] /Length 17 >>\nstream\n0 0 200 100 re f\n\nendstream\nendobj\n",
        );
        body.push_str("trailer\n<< /Root 1 0 R /Size 7 >>\nstartxref\n0\n%%EOF\n");
        body.into_bytes()
    }

    fn plain_pdf() -> Vec<u8> {
        let mut body = String::new();
        body.push_str("%PDF-1.4\n");
        body.push_str("1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
        body.push_str("2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n");
        body.push_str("3 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>\nendobj\n");
        body.push_str("trailer\n<< /Root 1 0 R /Size 4 >>\nstartxref\n0\n%%EOF\n");
        body.into_bytes()
    }

    #[test]
    fn interactive_documents_come_back_flattened_and_valid() {
        let result = normalize(&interactive_pdf()).unwrap();
        let Normalized::Flattened(bytes) = result else {
            panic!("expected flattened output");
        };

        let reparsed = Document::parse(&bytes).unwrap();
        let catalog_id = reparsed.catalog_id().unwrap();
        let catalog = reparsed.get(catalog_id).unwrap().as_dict().unwrap();
        assert!(!catalog.contains_key("AcroForm"));

        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains("/Annots"));
        assert!(text.contains("/FXO0 Do"));
    }

    #[test]
    fn normalization_is_idempotent() {
        let first = normalize(&interactive_pdf()).unwrap().into_bytes();
        let second = normalize(&first).unwrap();
        assert!(!second.is_degraded());
        assert_eq!(second.into_bytes(), first);
    }

    #[test]
    fn documents_without_interactive_content_still_rewrite_cleanly() {
        let result = normalize(&plain_pdf()).unwrap();
        assert!(!result.is_degraded());
        Document::parse(result.bytes()).unwrap();
    }

    #[test]
    fn encrypted_documents_are_rejected_with_no_output() {
        let mut body = plain_pdf();
        let text = String::from_utf8(body.clone()).unwrap();
        let patched = text.replace(
            "<< /Root 1 0 R /Size 4 >>",
            "<< /Root 1 0 R /Size 4 /Encrypt 9 0 R >>",
        );
        body = patched.into_bytes();

        assert_eq!(normalize(&body).unwrap_err(), PdfError::Encrypted);
    }

    #[test]
    fn non_pdf_bytes_are_invalid() {
        assert!(matches!(
            normalize(b"PK\x03\x04 definitely a zip"),
            Err(PdfError::Invalid(_))
        ));
    }

    #[test]
    fn truncated_documents_are_invalid() {
        let mut bytes = plain_pdf();
        bytes.truncate(40);
        assert!(matches!(normalize(&bytes), Err(PdfError::Invalid(_))));
    }

    #[test]
    fn oversized_documents_are_rejected() {
        let bytes = plain_pdf();
        let err = normalize_with_limit(&bytes, 16).unwrap_err();
        assert!(matches!(err, PdfError::TooLarge { .. }));
    }

    #[test]
    fn flattening_failure_degrades_to_the_original_bytes() {
        // Valid object syntax, but /Root points at a missing object: parses,
        // cannot flatten.
        let bytes = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 9 0 R >>\n".to_vec();
        let result = normalize(&bytes).unwrap();
        match result {
            Normalized::Degraded { bytes: out, reason } => {
                assert_eq!(out, bytes);
                assert!(!reason.is_empty());
            }
            other => panic!("expected degraded output, got {other:?}"),
        }
    }
}
