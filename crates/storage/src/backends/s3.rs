//! S3-compatible storage backend using AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::retry::RetryPolicy;
use crate::traits::{ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::OnceCell;
use tracing::instrument;

/// Minimum part size for S3 multipart uploads (5 MiB).
/// S3 requires all parts except the last to be at least 5 MB.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum buffer size before spilling to a temp file (64 MiB).
/// Bounds memory growth when the caller sends many small chunks.
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Marker included in lazy-credentials errors so they can be mapped to
/// authentication failures instead of generic transport errors.
const CREDENTIALS_ERROR_MARKER: &str = "vault-s3-credentials";

/// Lazily initializes the AWS default credentials chain on first signed
/// request. Initialization happens at most once: concurrent callers share
/// the single in-flight chain construction through the `OnceCell` instead
/// of authenticating in parallel.
#[derive(Debug)]
struct LazyCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async {
                let region = aws_config::Region::new(self.region.clone());
                tokio::task::spawn(async move {
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(region)
                        .build()
                        .await
                })
                .await
                .map_err(|join_err| {
                    CredentialsError::provider_error(format!(
                        "{CREDENTIALS_ERROR_MARKER}: failed to initialize credential chain: {join_err}"
                    ))
                })
            })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_ERROR_MARKER}: credential resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

/// Map an AWS SDK error into the storage error taxonomy.
///
/// 404 is NotFound, 401/403 and credential failures are Auth, timeouts and
/// 408/429/5xx are Transient (retryable), everything else is Backend.
fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_ERROR_MARKER) {
        return StorageError::Auth(format!("S3 credential resolution failed for {key}"));
    }

    match &err {
        aws_sdk_s3::error::SdkError::ServiceError(service_err) => {
            match service_err.raw().status().as_u16() {
                404 => StorageError::NotFound(key.to_string()),
                401 | 403 => StorageError::Auth(format!("S3 rejected credentials for {key}")),
                408 | 429 => StorageError::Transient(format!("S3 throttled request: {err_text}")),
                status if status >= 500 => {
                    StorageError::Transient(format!("S3 server error ({status}): {err_text}"))
                }
                _ => StorageError::Backend(Box::new(err)),
            }
        }
        aws_sdk_s3::error::SdkError::TimeoutError(_) => {
            StorageError::Transient(format!("S3 request timed out: {err_text}"))
        }
        aws_sdk_s3::error::SdkError::DispatchFailure(_) => {
            StorageError::Transient(format!("S3 request could not be dispatched: {err_text}"))
        }
        _ => StorageError::Backend(Box::new(err)),
    }
}

/// S3-compatible object store.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// `force_path_style` selects path-style URLs (`endpoint/bucket/key`),
    /// required for MinIO and some S3-compatible services; AWS S3 requires
    /// virtual-hosted style (false).
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "vault-config");
            builder = builder.credentials_provider(credentials);
        } else {
            // Defer ambient credential chain construction to first use.
            builder =
                builder.credentials_provider(LazyCredentialsProvider::new(resolved_region.clone()));
        }

        if let Some(endpoint_url) = &endpoint {
            // Handle bare host:port endpoints (e.g., "minio:9000").
            let normalized = if endpoint_url.to_lowercase().starts_with("http://")
                || endpoint_url.to_lowercase().starts_with("https://")
            {
                endpoint_url.clone()
            } else {
                format!("http://{endpoint_url}")
            };
            builder = builder.endpoint_url(&normalized);

            // Explicit HTTP endpoints (local MinIO) get an HTTP-only client so
            // SDK initialization doesn't depend on native trust roots.
            if normalized.to_ascii_lowercase().starts_with("http://") {
                builder = builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if force_path_style {
            builder = builder.force_path_style(true);
        }

        let normalized_prefix = prefix.map(|p| p.trim_end_matches('/').to_string());

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            prefix: normalized_prefix,
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let full_key = self.full_key(key);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => match map_sdk_error(err, key) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let full_key = self.full_key(key);
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let last_modified = output
            .last_modified()
            .and_then(|dt| time::OffsetDateTime::from_unix_timestamp(dt.secs()).ok());

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0) as u64,
            last_modified,
            content_type: output.content_type().map(|s| s.to_string()),
        })
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let full_key = self.full_key(key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(data.into())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let full_key = self.full_key(key);

        let create_output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let upload_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        Ok(Box::new(S3MultipartUpload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: full_key,
            upload_id,
            retry: RetryPolicy::default(),
            parts: Vec::new(),
            part_number: 1,
            bytes_written: 0,
            pending: PartBuffer::new(),
        }))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // S3 delete_object succeeds on missing keys, which matches the
        // idempotent-delete contract directly.
        let full_key = self.full_key(key);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

        let marker_key = self.full_key(".vault-health-check");
        let check = async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&marker_key)
                .body(Bytes::from_static(b"health-check").into())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, ".vault-health-check"))?;

            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&marker_key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, ".vault-health-check"))?;

            Ok(())
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check)
            .await
            .map_err(|_| StorageError::Transient("S3 health check timed out".to_string()))?
    }
}

/// Spill file state for uploads exceeding the in-memory buffer bound.
///
/// `written` and `read_pos` track logical positions; the single file cursor
/// is shared between appends and part reads, so every access seeks first.
struct SpillFile {
    file: tokio::fs::File,
    written: usize,
    read_pos: usize,
}

/// Accumulates upload bytes until full parts are available.
///
/// Data buffers in memory up to a spill threshold, then moves to a temp
/// file so memory stays bounded. Reads (parts) and writes (appends)
/// interleave on the spill file; each operation seeks to its own logical
/// position before touching the file, so a flush that leaves an unread
/// remainder can never be clobbered by the next append.
struct PartBuffer {
    part_size: usize,
    spill_threshold: usize,
    buffer: Vec<u8>,
    spill: Option<SpillFile>,
}

impl PartBuffer {
    fn new() -> Self {
        Self::with_limits(MIN_PART_SIZE, MAX_BUFFER_SIZE)
    }

    fn with_limits(part_size: usize, spill_threshold: usize) -> Self {
        Self {
            part_size,
            spill_threshold,
            buffer: Vec::new(),
            spill: None,
        }
    }

    /// Append bytes, spilling the buffer to a temp file past the threshold.
    async fn push(&mut self, data: &[u8]) -> StorageResult<()> {
        if let Some(spill) = self.spill.as_mut() {
            // Appends always go to the logical end, not wherever the last
            // part read left the cursor.
            spill
                .file
                .seek(std::io::SeekFrom::Start(spill.written as u64))
                .await?;
            spill.file.write_all(data).await?;
            spill.written += data.len();
            return Ok(());
        }

        self.buffer.extend_from_slice(data);
        if self.buffer.len() > self.spill_threshold {
            let mut file = tokio::fs::File::from_std(tempfile::tempfile()?);
            file.write_all(&self.buffer).await?;
            let written = self.buffer.len();
            self.buffer.clear();
            self.buffer.shrink_to_fit();
            self.spill = Some(SpillFile {
                file,
                written,
                read_pos: 0,
            });
            tracing::debug!(spill_bytes = written, "multipart buffer spilled to temp file");
        }
        Ok(())
    }

    /// Take the next full part, or `None` if less than a part is pending.
    async fn next_part(&mut self) -> StorageResult<Option<Bytes>> {
        if let Some(spill) = self.spill.as_mut() {
            if spill.written - spill.read_pos < self.part_size {
                return Ok(None);
            }
            spill
                .file
                .seek(std::io::SeekFrom::Start(spill.read_pos as u64))
                .await?;
            let mut part = vec![0u8; self.part_size];
            spill.file.read_exact(&mut part).await?;
            spill.read_pos += self.part_size;
            return Ok(Some(Bytes::from(part)));
        }

        if self.buffer.len() < self.part_size {
            return Ok(None);
        }
        let part: Vec<u8> = self.buffer.drain(..self.part_size).collect();
        Ok(Some(Bytes::from(part)))
    }

    /// Drain whatever has not been handed out as a part yet.
    async fn remaining(&mut self) -> StorageResult<Vec<u8>> {
        let mut remaining = Vec::new();
        if let Some(mut spill) = self.spill.take() {
            let unread = spill.written - spill.read_pos;
            if unread > 0 {
                spill
                    .file
                    .seek(std::io::SeekFrom::Start(spill.read_pos as u64))
                    .await?;
                remaining.reserve(unread);
                spill
                    .file
                    .take(unread as u64)
                    .read_to_end(&mut remaining)
                    .await?;
            }
        }
        remaining.append(&mut self.buffer);
        Ok(remaining)
    }
}

/// Streaming upload for S3 using multipart upload.
///
/// Incoming data accumulates until it satisfies S3's 5 MB minimum part size;
/// past 64 MiB the buffer spills to a temp file so memory stays bounded.
/// Nothing is resolvable under the key until `complete_multipart_upload`
/// succeeds, and `abort` discards all uploaded parts.
struct S3MultipartUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    retry: RetryPolicy,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    bytes_written: u64,
    pending: PartBuffer,
}

impl S3MultipartUpload {
    /// Upload one part. The part bytes are held in full, so transient
    /// failures are retried here rather than failing the whole transfer.
    async fn send_part(&mut self, data: Bytes) -> StorageResult<()> {
        let client = &self.client;
        let bucket = &self.bucket;
        let key = &self.key;
        let upload_id = &self.upload_id;
        let part_number = self.part_number;

        let output = self
            .retry
            .run("upload_part", || {
                let body = data.clone();
                async move {
                    client
                        .upload_part()
                        .bucket(bucket)
                        .key(key)
                        .upload_id(upload_id)
                        .part_number(part_number)
                        .body(body.into())
                        .send()
                        .await
                        .map_err(|e| map_sdk_error(e, key))
                }
            })
            .await?;

        self.parts.push(
            aws_sdk_s3::types::CompletedPart::builder()
                .e_tag(output.e_tag().unwrap_or_default())
                .part_number(self.part_number)
                .build(),
        );
        self.part_number += 1;
        Ok(())
    }

    async fn flush_ready_parts(&mut self) -> StorageResult<()> {
        while let Some(part) = self.pending.next_part().await? {
            self.send_part(part).await?;
        }
        Ok(())
    }

    async fn abort_upload(&self) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.key))?;
        Ok(())
    }
}

#[async_trait]
impl StreamingUpload for S3MultipartUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.bytes_written += data.len() as u64;
        self.pending.push(&data).await?;
        self.flush_ready_parts().await
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        let remaining = self.pending.remaining().await?;
        if !remaining.is_empty() {
            // The last part may be smaller than the 5 MB minimum.
            self.send_part(Bytes::from(remaining)).await?;
        }

        // S3 multipart requires at least one part; zero-byte uploads fall
        // back to a plain PutObject after aborting the multipart session.
        if self.parts.is_empty() {
            if let Err(e) = self.abort_upload().await {
                tracing::warn!(
                    key = %self.key,
                    upload_id = %self.upload_id,
                    error = %e,
                    "failed to abort empty multipart upload, orphaned parts may remain"
                );
            }

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(Bytes::new().into())
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &self.key))?;

            return Ok(self.bytes_written);
        }

        let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(self.parts.clone()))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &self.key))?;

        Ok(self.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.abort_upload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_backend(prefix: Option<String>) -> S3Backend {
        S3Backend::new(
            "test-bucket",
            Some("s3.test".to_string()),
            Some("us-east-1".to_string()),
            prefix,
            Some("access".to_string()),
            Some("secret".to_string()),
            true,
        )
        .await
        .expect("backend should construct for unit tests")
    }

    #[tokio::test]
    async fn test_full_key_applies_prefix() {
        let backend = make_backend(Some("assets".to_string())).await;
        assert_eq!(backend.full_key("path/file"), "assets/path/file");

        let backend = make_backend(None).await;
        assert_eq!(backend.full_key("path/file"), "path/file");
    }

    #[tokio::test]
    async fn test_trailing_slash_prefix_normalized() {
        let backend = S3Backend::new(
            "bucket",
            Some("minio:9000".to_string()),
            None,
            Some("assets/".to_string()),
            None,
            None,
            true,
        )
        .await
        .unwrap();
        assert_eq!(backend.full_key("a/b"), "assets/a/b");
    }

    #[tokio::test]
    async fn test_new_requires_complete_credentials() {
        let err = S3Backend::new(
            "bucket",
            None,
            Some("us-east-1".to_string()),
            None,
            Some("access".to_string()),
            None,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_part_buffer_small_payload_stays_in_memory() {
        let mut buffer = PartBuffer::with_limits(8, 64);
        buffer.push(&pattern(5)).await.unwrap();

        assert!(buffer.spill.is_none());
        assert!(buffer.next_part().await.unwrap().is_none());
        assert_eq!(buffer.remaining().await.unwrap(), pattern(5));
    }

    #[tokio::test]
    async fn test_part_buffer_drains_full_parts_in_order() {
        let input = pattern(20);
        let mut buffer = PartBuffer::with_limits(8, 1024);
        buffer.push(&input).await.unwrap();

        let mut output = Vec::new();
        while let Some(part) = buffer.next_part().await.unwrap() {
            assert_eq!(part.len(), 8);
            output.extend_from_slice(&part);
        }
        output.extend(buffer.remaining().await.unwrap());
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn test_part_buffer_spill_survives_interleaved_appends() {
        // One oversized chunk spills with an unread remainder after the
        // flush; the appends that follow must land after that remainder,
        // not on top of it.
        let mut buffer = PartBuffer::with_limits(8, 16);
        let mut input = pattern(20);
        buffer.push(&input).await.unwrap();
        assert!(buffer.spill.is_some());

        let mut output = Vec::new();
        while let Some(part) = buffer.next_part().await.unwrap() {
            output.extend_from_slice(&part);
        }
        // 16 of 20 bytes flushed; 4 unread bytes sit ahead of the cursor.
        assert_eq!(output.len(), 16);

        let tail = pattern(26)[20..].to_vec();
        buffer.push(&tail).await.unwrap();
        input.extend_from_slice(&tail);

        while let Some(part) = buffer.next_part().await.unwrap() {
            output.extend_from_slice(&part);
        }
        output.extend(buffer.remaining().await.unwrap());
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn test_part_buffer_spill_handles_many_append_flush_rounds() {
        let part = 8;
        let mut buffer = PartBuffer::with_limits(part, 10);
        let mut input = Vec::new();
        let mut output = Vec::new();

        // Odd-sized chunks keep the spill remainder non-empty between
        // rounds, alternating appends with part reads each time.
        for round in 0..12 {
            let chunk: Vec<u8> = (0..7).map(|i| (round * 7 + i) as u8).collect();
            buffer.push(&chunk).await.unwrap();
            input.extend_from_slice(&chunk);

            while let Some(part) = buffer.next_part().await.unwrap() {
                output.extend_from_slice(&part);
            }
        }
        output.extend(buffer.remaining().await.unwrap());
        assert_eq!(output, input);
    }
}
