//! Error types for attestation-verifier.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running the verifier.
///
/// Verdict-level failures (a blocked URL, a filter timeout, an ABI mismatch)
/// are not errors: they are mapped to an [`crate::AttestationStatus`]. This
/// enum covers the plumbing around the core.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The indexer could not answer a query.
    #[error("indexer error: {0}")]
    Indexer(String),

    /// The filter sandbox could not be started or talked to.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// ABI encoding error outside of a user-supplied signature.
    #[error("ABI error: {0}")]
    Abi(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The request failed shape validation.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] crate::validation::FieldError),
}
