//! Instance index for the DICOM object store.
//!
//! This crate provides the control-plane data model:
//! - Instance create/commit lifecycle with watermark allocation
//! - Study and series aggregates
//! - Soft-delete backlog and retry bookkeeping
//! - Extended query tag and partition registries
//! - Deletion job records and checkpoints

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use store::{MetadataStore, SqliteStore};

use pacs_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
