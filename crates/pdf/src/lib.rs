//! `sealflow-pdf` — pure PDF normalization.
//!
//! Byte-in/byte-out finalization of a signed document: parse the file,
//! refuse encrypted input, strip optional-content groups, flatten form
//! fields and annotations into page content, and re-serialize. The crate
//! performs no I/O and holds no state; [`normalize`] is the whole surface
//! most callers need.
//!
//! Flattening is cosmetic, so it degrades rather than fails: any error after
//! a structurally valid parse yields [`Normalized::Degraded`] carrying the
//! untouched original bytes. Only a structurally invalid or encrypted file
//! is a hard error.

pub mod document;
pub mod error;
pub mod flatten;
pub mod normalize;
pub mod object;
pub mod parser;
pub mod writer;

pub use document::Document;
pub use error::PdfError;
pub use flatten::{FlattenError, FlattenSummary, flatten};
pub use normalize::{DEFAULT_SIZE_LIMIT, Normalized, normalize, normalize_with_limit};
pub use object::{Dict, Object, ObjectId, Stream};
pub use writer::serialize;
