//! High-level storage client with retry and error normalization.

use crate::error::{StorageError, StorageResult};
use crate::retry::RetryPolicy;
use crate::traits::{ObjectMeta, ObjectStore};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::instrument;

/// Client wrapper over an [`ObjectStore`] backend.
///
/// Adds the behavior backends do not provide themselves: bounded retries
/// for transient failures, a single re-authentication attempt before the
/// backend is declared unavailable, idempotent delete, and abort-on-failure
/// for streaming uploads so a failed transfer never leaves a resolvable
/// partial object.
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("backend", &self.store.backend_name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl StorageClient {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Name of the underlying backend.
    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Access the underlying store for callers that need raw semantics.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Run `op` with transient retries, allowing one authentication retry.
    ///
    /// An auth failure usually means an expired session; the second pass
    /// gives the backend's credential provider a chance to re-establish it.
    /// A second auth failure escalates to `Unavailable`.
    async fn with_recovery<T, F, Fut>(&self, op_name: &str, mut op: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = StorageResult<T>>,
    {
        match self.retry.run(op_name, &mut op).await {
            Err(e) if e.is_auth() => {
                tracing::warn!(op = op_name, error = %e, "authentication failed, retrying once");
                match self.retry.run(op_name, &mut op).await {
                    Err(e) if e.is_auth() => Err(StorageError::Unavailable(format!(
                        "{op_name} failed authentication twice: {e}"
                    ))),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Check whether an object exists.
    ///
    /// `Ok(false)` is a confirmed absence from the backend; an error means
    /// the check could not be completed and says nothing about the object.
    #[instrument(skip(self))]
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.with_recovery("exists", || self.store.exists(key)).await
    }

    /// Fetch object metadata, mapping a missing object to `None`.
    #[instrument(skip(self))]
    pub async fn get_info(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        match self.with_recovery("head", || self.store.head(key)).await {
            Ok(meta) => Ok(Some(meta)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete an object. Deleting an absent object is success.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        match self.with_recovery("delete", || self.store.delete(key)).await {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stream `source` into the object at `key`, reporting cumulative bytes
    /// sent through `on_progress` after each chunk.
    ///
    /// Byte counts are monotonic. Opening the upload gets the same retry
    /// and re-authentication treatment as the other operations; once bytes
    /// start flowing the stream is not replayable, so a mid-transfer
    /// failure aborts the upload rather than retrying it. No partial
    /// object is ever resolvable under `key`.
    #[instrument(skip(self, source, on_progress))]
    pub async fn upload<S>(
        &self,
        key: &str,
        mut source: S,
        mut on_progress: impl FnMut(u64) + Send,
    ) -> StorageResult<u64>
    where
        S: Stream<Item = StorageResult<Bytes>> + Send + Unpin,
    {
        let mut sink = self
            .with_recovery("put_stream", || self.store.put_stream(key))
            .await?;
        let mut bytes_sent = 0u64;

        while let Some(chunk) = source.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    Self::abort_sink(sink, key).await;
                    return Err(e);
                }
            };
            if chunk.is_empty() {
                continue;
            }

            bytes_sent += chunk.len() as u64;
            if let Err(e) = sink.write(chunk).await {
                Self::abort_sink(sink, key).await;
                return Err(e);
            }
            on_progress(bytes_sent);
        }

        sink.finish().await
    }

    async fn abort_sink(sink: Box<dyn crate::traits::StreamingUpload>, key: &str) {
        if let Err(abort_err) = sink.abort().await {
            tracing::warn!(
                key,
                error = %abort_err,
                "failed to abort upload, backend resources may remain"
            );
        }
    }
}
