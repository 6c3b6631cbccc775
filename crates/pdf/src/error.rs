//! Error taxonomy for PDF handling.

use thiserror::Error;

/// Fatal problems with an input document.
///
/// Anything that parses but fails to flatten is *not* represented here; that
/// path degrades to the original bytes instead (see [`crate::normalize`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PdfError {
    /// The bytes are not a structurally valid PDF.
    #[error("invalid pdf: {0}")]
    Invalid(String),

    /// The document is encrypted. The platform owns encryption semantics,
    /// so encrypted uploads are rejected outright.
    #[error("pdf is encrypted")]
    Encrypted,

    /// The document exceeds the configured size limit.
    #[error("pdf is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
}

impl PdfError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}
