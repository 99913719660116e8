use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use vault_storage::error::{StorageError, StorageResult};
use vault_storage::traits::{ObjectMeta, ObjectStore, StreamingUpload};

/// Minimal in-memory object store for pipeline and reconcile tests.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    aborts: Arc<AtomicU32>,
    /// Artificial delay applied to every existence check.
    exists_delay: Option<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exists_delay(mut self, delay: Duration) -> Self {
        self.exists_delay = Some(delay);
        self
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

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn abort_count(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        if let Some(delay) = self.exists_delay {
            tokio::time::sleep(delay).await;
        }
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
        Ok(Box::new(MemoryUpload {
            objects: Arc::clone(&self.objects),
            aborts: Arc::clone(&self.aborts),
            key: key.to_string(),
            buffer: Vec::new(),
        }))
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
}

#[async_trait]
impl StreamingUpload for MemoryUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
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

/// Backend where every operation fails with a transient error, standing in
/// for a globally unreachable storage service.
#[derive(Default)]
pub struct UnreachableBackend;

impl UnreachableBackend {
    fn down<T>() -> StorageResult<T> {
        Err(StorageError::Transient("backend unreachable".to_string()))
    }
}

#[async_trait]
impl ObjectStore for UnreachableBackend {
    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        Self::down()
    }

    async fn head(&self, _key: &str) -> StorageResult<ObjectMeta> {
        Self::down()
    }

    async fn put(&self, _key: &str, _data: Bytes) -> StorageResult<()> {
        Self::down()
    }

    async fn put_stream(&self, _key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        Self::down()
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        Self::down()
    }

    fn backend_name(&self) -> &'static str {
        "unreachable"
    }
}
