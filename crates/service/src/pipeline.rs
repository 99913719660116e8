//! Upload pipeline: namespaced destination paths, byte transfer, progress.

use crate::error::{ServiceError, ServiceResult};
use crate::hub::ProgressHub;
use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use vault_core::{AssetReference, OperationId, ProgressEvent, UploadPhase};
use vault_storage::{StorageClient, StorageResult};

/// Caller-supplied context for one upload.
#[derive(Clone, Debug)]
pub struct UploadContext {
    /// Owning entity (course, user, ...) the asset belongs to.
    pub owner: String,
    /// Sub-category within the owner's namespace (e.g. "chapters/ch1").
    pub category: String,
    /// Original filename; sanitized before use.
    pub filename: String,
    /// Total payload size, when known up front.
    pub total_bytes: Option<u64>,
    /// Identifier progress subscribers use to watch this upload.
    pub operation_id: OperationId,
}

impl UploadContext {
    pub fn new(
        owner: impl Into<String>,
        category: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            category: category.into(),
            filename: filename.into(),
            total_bytes: None,
            operation_id: OperationId::new(),
        }
    }

    pub fn with_total_bytes(mut self, total: u64) -> Self {
        self.total_bytes = Some(total);
        self
    }

    pub fn with_operation_id(mut self, id: OperationId) -> Self {
        self.operation_id = id;
        self
    }
}

/// Streams assets into storage under collision-free namespaced keys.
///
/// On success the pipeline returns the [`AssetReference`] for the stored
/// object; persisting that reference is the caller's job. On failure the
/// underlying client aborts the transfer, so no partial object is ever
/// resolvable under the destination key.
pub struct UploadPipeline {
    storage_id: String,
    client: StorageClient,
    hub: Arc<ProgressHub>,
}

impl UploadPipeline {
    pub fn new(storage_id: impl Into<String>, client: StorageClient, hub: Arc<ProgressHub>) -> Self {
        Self {
            storage_id: storage_id.into(),
            client,
            hub,
        }
    }

    /// Compute the destination key for an upload context.
    ///
    /// The key is `<owner>/<category>/<uuid>_<filename>`. The UUID prefix
    /// makes keys collision-free even when unrelated uploads share owner,
    /// category, and filename.
    pub fn destination_path(&self, context: &UploadContext) -> ServiceResult<String> {
        let owner = sanitize_segment(&context.owner)
            .ok_or_else(|| ServiceError::InvalidContext("owner must not be empty".to_string()))?;
        let category = sanitize_segment(&context.category).ok_or_else(|| {
            ServiceError::InvalidContext("category must not be empty".to_string())
        })?;
        let filename = sanitize_filename(&context.filename).ok_or_else(|| {
            ServiceError::InvalidContext(format!("unusable filename: {:?}", context.filename))
        })?;

        Ok(format!(
            "{owner}/{category}/{}_{filename}",
            Uuid::new_v4().simple()
        ))
    }

    /// Upload `source` and return the reference for the stored object.
    #[instrument(skip(self, source), fields(operation_id = %context.operation_id))]
    pub async fn upload<S>(
        &self,
        context: &UploadContext,
        source: S,
    ) -> ServiceResult<AssetReference>
    where
        S: Stream<Item = StorageResult<Bytes>> + Send + Unpin,
    {
        let operation_id = context.operation_id;
        let total = context.total_bytes;

        let destination = match self.destination_path(context) {
            Ok(destination) => destination,
            Err(e) => {
                self.hub
                    .publish(ProgressEvent::at(operation_id, 0, total, UploadPhase::Failed));
                return Err(e);
            }
        };

        self.hub
            .publish(ProgressEvent::at(operation_id, 0, total, UploadPhase::Idle));

        let hub = Arc::clone(&self.hub);
        let last_reported = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let reported = Arc::clone(&last_reported);
        let result = self
            .client
            .upload(&destination, source, move |bytes_sent| {
                reported.store(bytes_sent, std::sync::atomic::Ordering::Relaxed);
                hub.publish(ProgressEvent::at(
                    operation_id,
                    bytes_sent,
                    total,
                    UploadPhase::Uploading,
                ));
            })
            .await;

        match result {
            Ok(written) => {
                self.hub.publish(ProgressEvent::at(
                    operation_id,
                    written,
                    total.or(Some(written)),
                    UploadPhase::Completed,
                ));
                tracing::info!(destination = %destination, bytes = written, "upload completed");
                Ok(AssetReference::new(&self.storage_id, &destination)?)
            }
            Err(e) => {
                // Report the last byte count so progress stays monotonic.
                let sent = last_reported.load(std::sync::atomic::Ordering::Relaxed);
                self.hub.publish(ProgressEvent::at(
                    operation_id,
                    sent,
                    total,
                    UploadPhase::Failed,
                ));
                tracing::warn!(destination = %destination, error = %e, "upload failed");
                Err(e.into())
            }
        }
    }
}

/// Sanitize a path segment (owner, category).
///
/// Slashes are kept so categories can nest; every path component must
/// survive sanitization or the whole segment is rejected.
fn sanitize_segment(raw: &str) -> Option<String> {
    let parts: Vec<String> = raw
        .split('/')
        .filter(|p| !p.is_empty())
        .map(sanitize_component)
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Sanitize a filename: directory components are stripped, the final
/// component keeps only filesystem-safe characters.
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?;
    sanitize_component(name)
}

fn sanitize_component(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Reject names that are empty or only dots after cleaning ("..", ".").
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        None
    } else {
        Some(cleaned)
    }
}
