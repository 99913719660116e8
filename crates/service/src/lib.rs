//! Upload pipeline, progress fan-out, and reconciliation for the vault.
//!
//! [`VaultService`] composes the storage client, signed-URL service, upload
//! pipeline, and reconciliation scanner into the operation surface exposed
//! to calling code: upload / sign / delete / reconcile.

pub mod error;
pub mod hub;
pub mod pipeline;
pub mod reconcile;

pub use error::{ServiceError, ServiceResult};
pub use hub::ProgressHub;
pub use pipeline::{UploadContext, UploadPipeline};
pub use reconcile::{
    InconclusiveRecord, MetadataRecord, OrphanReport, OrphanedRecord, ReconcileScanner,
};

use bytes::Bytes;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use vault_core::AssetReference;
use vault_signer::{IssueOutcome, SignerResult, UrlService};
use vault_storage::{ObjectStore, StorageClient, StorageResult};

/// Facade over the vault's caller-facing operations.
pub struct VaultService {
    storage_id: String,
    client: StorageClient,
    urls: UrlService,
    pipeline: UploadPipeline,
    scanner: ReconcileScanner,
    hub: Arc<ProgressHub>,
}

impl VaultService {
    /// Compose a service from a backend, the vault's storage id, and a
    /// configured URL service.
    pub fn new(storage_id: impl Into<String>, store: Arc<dyn ObjectStore>, urls: UrlService) -> Self {
        let storage_id = storage_id.into();
        let client = StorageClient::new(Arc::clone(&store));
        let hub = Arc::new(ProgressHub::new());
        let pipeline = UploadPipeline::new(storage_id.clone(), client.clone(), Arc::clone(&hub));
        let scanner = ReconcileScanner::new(store).expecting_storage_id(storage_id.clone());

        Self {
            storage_id,
            client,
            urls,
            pipeline,
            scanner,
            hub,
        }
    }

    /// Reject references that belong to a different storage backend.
    fn check_storage_id(&self, reference: &AssetReference) -> ServiceResult<()> {
        if reference.storage_id() != self.storage_id {
            return Err(ServiceError::ForeignStorageId {
                reference: reference.to_string(),
                found: reference.storage_id().to_string(),
                expected: self.storage_id.clone(),
            });
        }
        Ok(())
    }

    /// Progress hub for subscribing to upload events.
    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    /// Upload an asset; returns the reference the caller should persist.
    pub async fn upload<S>(
        &self,
        context: &UploadContext,
        source: S,
    ) -> ServiceResult<AssetReference>
    where
        S: Stream<Item = StorageResult<Bytes>> + Send + Unpin,
    {
        self.pipeline.upload(context, source).await
    }

    /// Issue a signed delivery URL for a reference.
    pub fn issue(&self, reference: &AssetReference, window: Duration) -> IssueOutcome {
        self.urls.issue(reference, window)
    }

    /// Issue signed URLs for a batch of encoded references.
    pub async fn issue_batch(
        &self,
        references: &[String],
        window: Duration,
    ) -> Vec<SignerResult<IssueOutcome>> {
        self.urls.issue_batch(references, window).await
    }

    /// Delete the object behind a reference. Absent objects are success;
    /// references scoped to another storage backend are refused.
    pub async fn delete(&self, reference: &AssetReference) -> ServiceResult<()> {
        self.check_storage_id(reference)?;
        self.client.delete(reference.storage_path()).await?;
        Ok(())
    }

    /// Reconcile metadata records against backend object existence.
    pub async fn reconcile(&self, records: &[MetadataRecord]) -> OrphanReport {
        self.scanner.scan(records).await
    }
}
