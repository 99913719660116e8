//! Signer error types.

use thiserror::Error;

/// Signing operation errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("no signing secret configured")]
    MissingSecret,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("reference error: {0}")]
    Reference(#[from] vault_core::Error),
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
