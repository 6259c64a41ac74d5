//! Soft-delete backlog repository.

use crate::error::MetadataResult;
use crate::models::DeletedInstanceRow;
use async_trait::async_trait;
use pacs_core::{BatchRequest, VersionedInstanceIdentifier, WatermarkRange};
use time::OffsetDateTime;

/// Repository for deleted-instance bookkeeping consumed by the purge job.
#[async_trait]
pub trait DeletedInstanceRepo: Send + Sync {
    /// Partition the eligible backlog into descending watermark ranges.
    ///
    /// Scans from the highest watermark at or below `request.max_watermark`
    /// whose `cleanup_after <= now`, taking at most
    /// `batch_size * max_parallel_batches` watermarks. Rows deleted after
    /// `request.deleted_until` are skipped.
    async fn get_deletable_batches(
        &self,
        request: &BatchRequest,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<WatermarkRange>>;

    /// Eligible rows inside `range`, highest watermark first.
    ///
    /// With `deleted_until` set, rows deleted after that instant are left out.
    async fn get_deleted_instances(
        &self,
        range: WatermarkRange,
        now: OffsetDateTime,
        deleted_until: Option<OffsetDateTime>,
    ) -> MetadataResult<Vec<DeletedInstanceRow>>;

    /// Get one deleted row regardless of eligibility.
    async fn get_deleted_instance(
        &self,
        identifier: &VersionedInstanceIdentifier,
    ) -> MetadataResult<Option<DeletedInstanceRow>>;

    /// Remove the row once its object is gone. Returns whether a row existed.
    async fn purge_deleted_instance(
        &self,
        identifier: &VersionedInstanceIdentifier,
    ) -> MetadataResult<bool>;

    /// Record a failed physical delete and push out `cleanup_after`.
    ///
    /// Returns the new retry count.
    async fn increment_deleted_instance_retry(
        &self,
        identifier: &VersionedInstanceIdentifier,
        now: OffsetDateTime,
        base_backoff: time::Duration,
    ) -> MetadataResult<i32>;

    /// Count rows whose retry count reached `max_retries`.
    async fn retrieve_num_exhausted_deleted_instance_attempts(
        &self,
        max_retries: i32,
    ) -> MetadataResult<i64>;

    /// Oldest `deleted_date_time` still present, or now when empty.
    async fn get_oldest_deleted(&self) -> MetadataResult<OffsetDateTime>;
}
