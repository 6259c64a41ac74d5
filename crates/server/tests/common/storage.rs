//! Object store test utilities.

use async_trait::async_trait;
use bytes::Bytes;
use pacs_storage::{
    FilesystemBackend, InstanceFileStore, MemoryBackend, ObjectStore, StorageError,
    StorageResult,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// A filesystem object store in a temp directory.
#[allow(dead_code)]
pub struct TestStorage {
    pub backend: Arc<FilesystemBackend>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path().join("objects"))
            .await
            .expect("Failed to create filesystem backend");

        Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.backend.clone()
    }

    pub fn files(&self) -> InstanceFileStore {
        InstanceFileStore::new(self.store())
    }
}

/// In-memory backend whose deletes fail for selected watermarks.
///
/// Deletes of poisoned keys always fail with `Unavailable`; every other
/// operation goes straight to memory.
#[allow(dead_code)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    poisoned: Mutex<HashSet<String>>,
    pub delete_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::new(),
            poisoned: Mutex::new(HashSet::new()),
            delete_calls: AtomicUsize::new(0),
        })
    }

    /// Make deletes of `watermark`'s object fail until healed.
    pub fn poison(&self, watermark: i64) {
        self.poisoned
            .lock()
            .unwrap()
            .insert(InstanceFileStore::key(watermark));
    }

    pub fn heal(&self, watermark: i64) {
        self.poisoned
            .lock()
            .unwrap()
            .remove(&InstanceFileStore::key(watermark));
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn is_poisoned(&self, key: &str) -> bool {
        self.poisoned.lock().unwrap().contains(key)
    }
}

#[async_trait]
impl ObjectStore for FlakyBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn put_if_not_exists(&self, key: &str, data: Bytes) -> StorageResult<bool> {
        self.inner.put_if_not_exists(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_poisoned(key) {
            return Err(StorageError::Unavailable(format!(
                "injected failure deleting {key}"
            )));
        }
        self.inner.delete(key).await
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        self.inner.copy(from, to).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}
