//! Instance file store behavior over real backends.

mod common;

use bytes::Bytes;
use common::FailingBackend;
use pacs_storage::{FilesystemBackend, InstanceFileStore, ObjectStore, StorageError};
use std::sync::Arc;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_filesystem_instance_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
    let files = InstanceFileStore::new(backend.clone());

    let location = files
        .store_file(41, Bytes::from_static(b"DICM-41"))
        .await
        .unwrap();
    assert!(dir.path().join(&location.file_path).exists());
    assert!(files.file_exists(41).await.unwrap());

    files.copy_file(41, 42).await.unwrap();
    assert_eq!(
        files.get_file(42).await.unwrap(),
        Bytes::from_static(b"DICM-41")
    );

    assert!(files.delete_file_if_exists(41).await.unwrap());
    assert!(!files.delete_file_if_exists(41).await.unwrap());
    assert_eq!(
        backend.list("instances").await.unwrap(),
        vec!["instances/42.dcm".to_string()]
    );
}

#[tokio::test]
async fn test_overwrite_changes_etag() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
    let files = InstanceFileStore::new(backend);

    let first = files.store_file(5, Bytes::from("a")).await.unwrap();
    let second = files.store_file(5, Bytes::from("b")).await.unwrap();
    assert_eq!(first.file_path, second.file_path);
    assert_ne!(first.etag, second.etag);
}

#[tokio::test]
async fn test_transient_delete_failure_is_surfaced() {
    let (backend, delete_calls) = FailingBackend::new(1);
    let files = InstanceFileStore::new(backend);
    files.store_file(9, Bytes::from("x")).await.unwrap();

    let err = files.delete_file_if_exists(9).await.unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert!(err.is_transient());
    assert!(files.file_exists(9).await.unwrap());

    assert!(files.delete_file_if_exists(9).await.unwrap());
    assert_eq!(delete_calls.load(Ordering::SeqCst), 2);
}
