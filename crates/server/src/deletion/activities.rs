//! Side effects executed by the orchestrator.

use super::error::{DeletionError, DeletionResult};
use async_trait::async_trait;
use pacs_core::{BatchRequest, DeletionJobId, WatermarkRange};
use pacs_metadata::repos::{DeletedInstanceRepo, DeletionJobRepo};
use pacs_metadata::{MetadataError, MetadataStore};
use pacs_storage::InstanceFileStore;
use std::sync::Arc;
use time::OffsetDateTime;

/// Outcome of one settled batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Rows whose object was removed and whose bookkeeping was purged.
    pub purged: u64,
    /// Rows whose physical delete failed and were rescheduled.
    pub retried: u64,
}

/// Remote calls made by a deletion cycle.
///
/// Every method is invoked through the retry policy, so implementations make
/// a single attempt and report transient failures through the error type.
#[async_trait]
pub trait DeletionActivities: Send + Sync {
    /// Partition the eligible backlog at or below `request.max_watermark`.
    async fn get_deletable_batches(
        &self,
        request: &BatchRequest,
    ) -> DeletionResult<Vec<WatermarkRange>>;

    /// Remove every eligible object in `range` deleted at or before
    /// `deleted_until` and settle its bookkeeping.
    ///
    /// A failed object delete is recorded against that watermark and does
    /// not fail the batch.
    async fn delete_batch(
        &self,
        range: WatermarkRange,
        deleted_until: OffsetDateTime,
    ) -> DeletionResult<BatchStats>;

    /// Creation time of the job, read once per job lifetime.
    async fn get_job_created_time(&self, job_id: DeletionJobId)
    -> DeletionResult<OffsetDateTime>;
}

/// Activities backed by the instance index and the object store.
pub struct IndexDeletionActivities {
    metadata: Arc<dyn MetadataStore>,
    files: InstanceFileStore,
    cleanup_backoff: time::Duration,
}

impl IndexDeletionActivities {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        files: InstanceFileStore,
        cleanup_backoff: time::Duration,
    ) -> Self {
        Self {
            metadata,
            files,
            cleanup_backoff,
        }
    }
}

#[async_trait]
impl DeletionActivities for IndexDeletionActivities {
    async fn get_deletable_batches(
        &self,
        request: &BatchRequest,
    ) -> DeletionResult<Vec<WatermarkRange>> {
        let batches = self
            .metadata
            .get_deletable_batches(request, OffsetDateTime::now_utc())
            .await?;
        Ok(batches)
    }

    async fn delete_batch(
        &self,
        range: WatermarkRange,
        deleted_until: OffsetDateTime,
    ) -> DeletionResult<BatchStats> {
        let now = OffsetDateTime::now_utc();
        let rows = self
            .metadata
            .get_deleted_instances(range, now, Some(deleted_until))
            .await?;
        let mut stats = BatchStats::default();

        for row in rows {
            let identifier = row.versioned_identifier();
            match self.files.delete_file_if_exists(row.watermark).await {
                Ok(existed) => {
                    if !existed {
                        tracing::debug!(
                            watermark = row.watermark,
                            "Object already absent, purging bookkeeping"
                        );
                    }
                    self.metadata.purge_deleted_instance(&identifier).await?;
                    stats.purged += 1;
                }
                Err(e) => {
                    let retry_count = self
                        .metadata
                        .increment_deleted_instance_retry(&identifier, now, self.cleanup_backoff)
                        .await?;
                    tracing::warn!(
                        watermark = row.watermark,
                        retry_count,
                        error = %e,
                        "Failed to delete instance object, rescheduled"
                    );
                    stats.retried += 1;
                }
            }
        }

        tracing::debug!(
            range = %range,
            purged = stats.purged,
            retried = stats.retried,
            "Batch settled"
        );
        Ok(stats)
    }

    async fn get_job_created_time(
        &self,
        job_id: DeletionJobId,
    ) -> DeletionResult<OffsetDateTime> {
        let job = self
            .metadata
            .get_deletion_job(*job_id.as_uuid())
            .await?
            .ok_or_else(|| {
                DeletionError::Metadata(MetadataError::NotFound(format!(
                    "deletion job {job_id}"
                )))
            })?;
        Ok(job.created_at)
    }
}
