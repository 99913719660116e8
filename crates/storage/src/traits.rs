//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// Object store abstraction over a remote binary storage backend.
///
/// `exists` has a deliberate tri-state contract: `Ok(true)` and `Ok(false)`
/// are confirmed answers from the backend, while `Err(_)` means the check
/// could not be completed (auth or network failure). Callers must never
/// treat a failed check as confirmed absence.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's metadata without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Put a small object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload.
    ///
    /// Until `finish` succeeds, no object is resolvable under `key`; callers
    /// must `abort` on failure to release backend resources.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Backends may report an absent object as `NotFound`
    /// or as success; the client layer normalizes both to idempotent success.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the name of this storage backend (for metrics and logging).
    fn backend_name(&self) -> &'static str;

    /// Verify backend connectivity at startup.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding any partially written data.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
