//! Watermark-addressed file store for instance bytes.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::Bytes;
use pacs_core::ObjectLocation;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Stores each instance revision under its watermark.
///
/// The index never addresses objects by name; every operation here takes a
/// watermark and derives the key from it.
#[derive(Clone)]
pub struct InstanceFileStore {
    store: Arc<dyn ObjectStore>,
}

impl InstanceFileStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Object key for a watermark.
    pub fn key(watermark: i64) -> String {
        format!("instances/{watermark}.dcm")
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Store bytes for `watermark`, replacing any previous content.
    pub async fn store_file(&self, watermark: i64, data: Bytes) -> StorageResult<ObjectLocation> {
        let etag = content_etag(&data);
        let key = Self::key(watermark);
        self.store.put(&key, data).await?;
        Ok(ObjectLocation {
            file_path: key,
            etag,
        })
    }

    pub async fn get_file(&self, watermark: i64) -> StorageResult<Bytes> {
        self.store.get(&Self::key(watermark)).await
    }

    pub async fn file_exists(&self, watermark: i64) -> StorageResult<bool> {
        self.store.exists(&Self::key(watermark)).await
    }

    /// Delete the object for `watermark`. An absent object is not an error.
    ///
    /// Returns whether an object was removed.
    pub async fn delete_file_if_exists(&self, watermark: i64) -> StorageResult<bool> {
        match self.store.delete(&Self::key(watermark)).await {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => {
                tracing::debug!(watermark, "Instance file already absent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Copy `from` to `to`; no-op when `to` already exists.
    pub async fn copy_file(&self, from: i64, to: i64) -> StorageResult<()> {
        let to_key = Self::key(to);
        if self.store.exists(&to_key).await? {
            return Ok(());
        }
        self.store.copy(&Self::key(from), &to_key).await
    }
}

/// SHA-256 hex digest used as the object ETag.
pub fn content_etag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;

    fn file_store() -> (InstanceFileStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        (InstanceFileStore::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_store_file_reports_location() {
        let (files, backend) = file_store();
        let location = files.store_file(12, Bytes::from("abc")).await.unwrap();

        assert_eq!(location.file_path, "instances/12.dcm");
        assert_eq!(
            location.etag,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(backend.exists("instances/12.dcm").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (files, _) = file_store();
        files.store_file(3, Bytes::from("x")).await.unwrap();

        assert!(files.delete_file_if_exists(3).await.unwrap());
        assert!(!files.delete_file_if_exists(3).await.unwrap());
        assert!(matches!(
            files.get_file(3).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_copy_skips_existing_destination() {
        let (files, _) = file_store();
        files.store_file(1, Bytes::from("old")).await.unwrap();
        files.store_file(2, Bytes::from("kept")).await.unwrap();

        files.copy_file(1, 2).await.unwrap();
        assert_eq!(files.get_file(2).await.unwrap(), Bytes::from("kept"));

        files.copy_file(1, 5).await.unwrap();
        assert_eq!(files.get_file(5).await.unwrap(), Bytes::from("old"));

        assert!(matches!(
            files.copy_file(9, 10).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
