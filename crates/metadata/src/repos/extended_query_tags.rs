//! Extended query tag registry.

use crate::error::MetadataResult;
use crate::models::ExtendedQueryTagRow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Tag to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExtendedQueryTag {
    /// DICOM tag path, e.g. `00101001`.
    pub path: String,
    /// Value representation, e.g. `PN`.
    pub vr: String,
    /// `Study`, `Series`, or `Instance`.
    pub level: String,
}

#[async_trait]
pub trait ExtendedQueryTagRepo: Send + Sync {
    /// Register tags, allocating increasing keys. Existing paths are rejected.
    async fn add_extended_query_tags(
        &self,
        tags: &[NewExtendedQueryTag],
    ) -> MetadataResult<Vec<ExtendedQueryTagRow>>;

    async fn get_extended_query_tags(&self) -> MetadataResult<Vec<ExtendedQueryTagRow>>;

    /// Highest live tag key, `None` when no tags are registered.
    async fn get_max_tag_key(&self) -> MetadataResult<Option<i32>>;

    async fn delete_extended_query_tag(&self, path: &str) -> MetadataResult<()>;
}
