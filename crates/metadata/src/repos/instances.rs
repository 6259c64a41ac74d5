//! Live instance repository.

use crate::error::MetadataResult;
use crate::models::{InstanceRow, SeriesRow, StudyRow};
use async_trait::async_trait;
use pacs_core::{
    IndexStatus, IndexedDataset, InstanceIdentifier, ObjectLocation, VersionedInstanceIdentifier,
};
use time::OffsetDateTime;

/// Repository for the instance create/commit lifecycle and deletes.
#[async_trait]
pub trait InstanceRepo: Send + Sync {
    /// Allocate a watermark and insert the instance in `Creating`.
    ///
    /// Also upserts the study and series aggregates from `dataset`.
    /// `tag_version` is the max tag key the caller indexed against; `None`
    /// skips the staleness check. Fails with `PendingInstanceCreation` or
    /// `InstanceAlreadyExists` when a live row already holds the identity.
    async fn begin_create_instance(
        &self,
        partition_key: i32,
        dataset: &IndexedDataset,
        tag_version: Option<i32>,
    ) -> MetadataResult<i64>;

    /// Move a `Creating` row at `watermark` to `Created`.
    ///
    /// Fails with `InstanceNotFound` when no such `Creating` row exists and
    /// with `ExtendedQueryTagsOutOfDate` when tags were added after
    /// `tag_version` was sampled.
    async fn end_create_instance(
        &self,
        identifier: &InstanceIdentifier,
        watermark: i64,
        tag_version: Option<i32>,
        location: &ObjectLocation,
    ) -> MetadataResult<()>;

    /// Get the live row for an identity, in either status.
    async fn get_instance(
        &self,
        identifier: &InstanceIdentifier,
    ) -> MetadataResult<Option<InstanceRow>>;

    /// List live instances at study, series, or instance granularity.
    async fn get_instance_identifiers(
        &self,
        partition_key: i32,
        study_instance_uid: &str,
        series_instance_uid: Option<&str>,
        sop_instance_uid: Option<&str>,
        status: IndexStatus,
    ) -> MetadataResult<Vec<VersionedInstanceIdentifier>>;

    async fn get_study_metadata(
        &self,
        partition_key: i32,
        study_instance_uid: &str,
    ) -> MetadataResult<Option<StudyRow>>;

    async fn get_series_metadata(
        &self,
        partition_key: i32,
        study_instance_uid: &str,
        series_instance_uid: &str,
    ) -> MetadataResult<Option<SeriesRow>>;

    /// Soft-delete one instance.
    async fn delete_instance(
        &self,
        identifier: &InstanceIdentifier,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<VersionedInstanceIdentifier>>;

    /// Soft-delete every instance in a series.
    async fn delete_series(
        &self,
        partition_key: i32,
        study_instance_uid: &str,
        series_instance_uid: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<VersionedInstanceIdentifier>>;

    /// Soft-delete every instance in a study.
    async fn delete_study(
        &self,
        partition_key: i32,
        study_instance_uid: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<VersionedInstanceIdentifier>>;
}
