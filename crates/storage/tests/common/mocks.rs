use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use vault_storage::error::{StorageError, StorageResult};
use vault_storage::traits::{ObjectMeta, ObjectStore, StreamingUpload};

/// In-memory object store for behavior tests.
///
/// Deleting an absent key reports `NotFound`, like the filesystem backend,
/// so that client-level delete normalization is exercised.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    aborts: Arc<AtomicU32>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, data: impl Into<Bytes>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn abort_count(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }

    fn upload(&self, key: &str) -> MemoryUpload {
        MemoryUpload {
            objects: Arc::clone(&self.objects),
            aborts: Arc::clone(&self.aborts),
            key: key.to_string(),
            buffer: Vec::new(),
            fail_write_after: None,
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.contains(key))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: data.len() as u64,
            last_modified: None,
            content_type: None,
        })
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.insert(key, data);
        Ok(())
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Ok(Box::new(self.upload(key)))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match self.objects.lock().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

pub struct MemoryUpload {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    aborts: Arc<AtomicU32>,
    key: String,
    buffer: Vec<u8>,
    fail_write_after: Option<usize>,
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        if let Some(limit) = self.fail_write_after {
            if self.buffer.len() + data.len() > limit {
                return Err(StorageError::Transient(
                    "injected write failure".to_string(),
                ));
            }
        }
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let size = self.buffer.len() as u64;
        self.objects
            .lock()
            .unwrap()
            .insert(self.key, Bytes::from(self.buffer));
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wraps a [`MemoryBackend`] and injects scripted failures before
/// delegating.
///
/// `transient` and `auth` failure budgets are consumed one per call with
/// transient taking precedence. Every call increments the call counter.
pub struct FlakyBackend {
    inner: MemoryBackend,
    transient_failures: AtomicU32,
    auth_failures: AtomicU32,
    calls: AtomicU64,
    fail_write_after: Mutex<Option<usize>>,
}

impl FlakyBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            transient_failures: AtomicU32::new(0),
            auth_failures: AtomicU32::new(0),
            calls: AtomicU64::new(0),
            fail_write_after: Mutex::new(None),
        }
    }

    pub fn inject_transient(&self, count: u32) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn inject_auth(&self, count: u32) {
        self.auth_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_writes_after(&self, bytes: usize) {
        *self.fail_write_after.lock().unwrap() = Some(bytes);
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn fault(&self) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let take = |counter: &AtomicU32| {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        };

        if take(&self.transient_failures) {
            return Err(StorageError::Transient("injected".to_string()));
        }
        if take(&self.auth_failures) {
            return Err(StorageError::Auth("injected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FlakyBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.fault()?;
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.fault()?;
        self.inner.head(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.fault()?;
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        self.fault()?;
        let mut upload = self.inner.upload(key);
        upload.fail_write_after = *self.fail_write_after.lock().unwrap();
        Ok(Box::new(upload))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.fault()?;
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky-memory"
    }
}
