//! Service-level error type.

use thiserror::Error;

/// Errors surfaced by the upload pipeline and reconciliation scanner.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] vault_core::Error),

    #[error(transparent)]
    Signer(#[from] vault_signer::SignerError),

    #[error(transparent)]
    Storage(#[from] vault_storage::StorageError),

    #[error("invalid upload context: {0}")]
    InvalidContext(String),

    #[error("reference {reference} belongs to storage {found}, not {expected}")]
    ForeignStorageId {
        reference: String,
        found: String,
        expected: String,
    },
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
