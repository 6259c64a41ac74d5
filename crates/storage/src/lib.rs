//! Object store facade for instance bytes.
//!
//! This crate provides:
//! - A key-addressed [`ObjectStore`] trait with atomic writes
//! - Backends: local filesystem and in-memory
//! - [`InstanceFileStore`], which addresses objects by watermark only

pub mod backends;
pub mod error;
pub mod instance_store;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, memory::MemoryBackend};
pub use error::{StorageError, StorageResult};
pub use instance_store::{InstanceFileStore, content_etag};
pub use traits::ObjectStore;

use pacs_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; instance files are lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
