//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed reference: {0}")]
    MalformedReference(String),

    #[error("invalid storage identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("invalid operation id: {0}")]
    InvalidOperationId(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
