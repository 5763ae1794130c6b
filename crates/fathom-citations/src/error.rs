//! Error types for fathom-citations.

use thiserror::Error;

/// Result type for citation registry operations.
pub type Result<T> = std::result::Result<T, CitationError>;

/// Errors that can occur in citation registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CitationError {
    /// No citation has been registered under this id.
    #[error("Citation [{0}] is not registered")]
    UnknownId(u32),

    /// The URL is empty or otherwise unusable as a citation target.
    #[error("Invalid citation URL: {0:?}")]
    InvalidUrl(String),
}
