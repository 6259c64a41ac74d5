//! Deletion job repository.

use crate::error::MetadataResult;
use crate::models::DeletionJobRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for deletion job records and their checkpoints.
#[async_trait]
pub trait DeletionJobRepo: Send + Sync {
    /// Create a job. Fails with `Constraint` when a job of the same type is
    /// already queued or running.
    async fn create_deletion_job(&self, job: &DeletionJobRow) -> MetadataResult<()>;

    async fn get_deletion_job(&self, job_id: Uuid) -> MetadataResult<Option<DeletionJobRow>>;

    /// Persist progress after a cycle without changing state.
    async fn save_deletion_checkpoint(
        &self,
        job_id: Uuid,
        checkpoint_json: &str,
        stats_json: Option<&str>,
    ) -> MetadataResult<()>;

    /// Update job state.
    async fn update_deletion_job_state(
        &self,
        job_id: Uuid,
        state: &str,
        finished_at: Option<OffsetDateTime>,
    ) -> MetadataResult<()>;

    /// Most recently created jobs first.
    async fn get_recent_deletion_jobs(&self, limit: u32) -> MetadataResult<Vec<DeletionJobRow>>;

    /// Jobs in 'queued' or 'running' state.
    ///
    /// After a restart these are orphaned and need to be resumed.
    async fn get_active_deletion_jobs(&self) -> MetadataResult<Vec<DeletionJobRow>>;
}
