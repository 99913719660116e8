//! Object storage abstraction and backends for the private asset vault.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait with streaming upload support
//! - Backends: local filesystem and S3-compatible
//! - [`StorageClient`], which layers retries, idempotent delete, and
//!   abort-on-failure uploads over any backend

pub mod backends;
pub mod client;
pub mod error;
pub mod retry;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use client::StorageClient;
pub use error::{StorageError, StorageResult};
pub use retry::RetryPolicy;
pub use traits::{ObjectMeta, ObjectStore, StreamingUpload};

use std::sync::Arc;
use vault_core::config::StorageConfig;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config
        .validate()
        .map_err(|e| StorageError::Config(e.to_string()))?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
