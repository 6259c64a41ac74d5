use async_trait::async_trait;
use bytes::Bytes;
use pacs_storage::error::{StorageError, StorageResult};
use pacs_storage::traits::ObjectStore;
use pacs_storage::MemoryBackend;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backend whose deletes fail with `Unavailable` until `failures` is spent,
/// then delegate to an in-memory store.
#[allow(dead_code)]
pub struct FailingBackend {
    inner: MemoryBackend,
    remaining_failures: AtomicUsize,
    pub delete_calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl FailingBackend {
    pub fn new(failures: usize) -> (Arc<Self>, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(Self {
            inner: MemoryBackend::new(),
            remaining_failures: AtomicUsize::new(failures),
            delete_calls: counter.clone(),
        });
        (backend, counter)
    }

    fn take_failure(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for FailingBackend {
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
        if self.take_failure() {
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
        "failing"
    }
}
