//! Partition registry.

use crate::error::MetadataResult;
use crate::models::PartitionRow;
use async_trait::async_trait;

#[async_trait]
pub trait PartitionRepo: Send + Sync {
    /// Create a partition with the next free key.
    async fn add_partition(&self, partition_name: &str) -> MetadataResult<PartitionRow>;

    async fn get_partition_by_name(
        &self,
        partition_name: &str,
    ) -> MetadataResult<Option<PartitionRow>>;

    async fn get_partitions(&self) -> MetadataResult<Vec<PartitionRow>>;
}
