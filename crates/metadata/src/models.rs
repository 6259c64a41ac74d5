//! Database models mapping to the index schema.

use crate::error::{MetadataError, MetadataResult};
use pacs_core::{IndexStatus, InstanceIdentifier, VersionedInstanceIdentifier};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Timestamp columns
// =============================================================================

/// Encode an instant for an INTEGER timestamp column (unix nanoseconds, UTC).
///
/// Columns that are compared or ordered in SQL use this encoding so the
/// database compares instants rather than formatted strings.
pub fn to_unix_nanos(at: OffsetDateTime) -> MetadataResult<i64> {
    i64::try_from(at.unix_timestamp_nanos()).map_err(|_| {
        MetadataError::Internal(format!("timestamp {at} is outside the storable range"))
    })
}

/// Decode an INTEGER timestamp column.
pub fn from_unix_nanos(nanos: i64) -> MetadataResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| MetadataError::Internal(format!("invalid stored timestamp {nanos}: {e}")))
}

fn nanos_column(row: &SqliteRow, column: &str) -> sqlx::Result<OffsetDateTime> {
    let nanos: i64 = row.try_get(column)?;
    from_unix_nanos(nanos).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn optional_nanos_column(row: &SqliteRow, column: &str) -> sqlx::Result<Option<OffsetDateTime>> {
    let nanos: Option<i64> = row.try_get(column)?;
    nanos
        .map(|nanos| {
            from_unix_nanos(nanos).map_err(|e| sqlx::Error::ColumnDecode {
                index: column.to_string(),
                source: Box::new(e),
            })
        })
        .transpose()
}

// =============================================================================
// Partitions
// =============================================================================

/// Partition record scoping all instance identities.
#[derive(Debug, Clone, FromRow)]
pub struct PartitionRow {
    pub partition_key: i32,
    pub partition_name: String,
    pub created_date: OffsetDateTime,
}

// =============================================================================
// Live instances
// =============================================================================

/// Live instance record.
#[derive(Debug, Clone, FromRow)]
pub struct InstanceRow {
    /// Version number; also the object store address.
    pub watermark: i64,
    pub partition_key: i32,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    /// Stored [`IndexStatus`] integer.
    pub status: i32,
    /// Set once the bytes are committed.
    pub file_path: Option<String>,
    pub etag: Option<String>,
    pub created_date: OffsetDateTime,
    pub last_status_updated_date: OffsetDateTime,
}

impl InstanceRow {
    pub fn index_status(&self) -> MetadataResult<IndexStatus> {
        Ok(IndexStatus::from_i32(self.status)?)
    }

    pub fn versioned_identifier(&self) -> VersionedInstanceIdentifier {
        InstanceIdentifier::new(
            self.partition_key,
            self.study_instance_uid.clone(),
            self.series_instance_uid.clone(),
            self.sop_instance_uid.clone(),
        )
        .with_version(self.watermark)
    }
}

/// Study-level aggregate, last writer wins.
#[derive(Debug, Clone, FromRow)]
pub struct StudyRow {
    pub partition_key: i32,
    pub study_instance_uid: String,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub referring_physician_name: Option<String>,
    pub study_date: Option<Date>,
    pub study_description: Option<String>,
    pub accession_number: Option<String>,
    pub updated_at: OffsetDateTime,
}

/// Series-level aggregate, last writer wins.
#[derive(Debug, Clone, FromRow)]
pub struct SeriesRow {
    pub partition_key: i32,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub modality: Option<String>,
    pub performed_procedure_step_start_date: Option<Date>,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// Soft-deleted instances
// =============================================================================

/// Bookkeeping for an instance whose object has not been purged yet.
#[derive(Debug, Clone)]
pub struct DeletedInstanceRow {
    pub partition_key: i32,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    pub watermark: i64,
    pub deleted_date_time: OffsetDateTime,
    /// Failed physical deletes so far.
    pub retry_count: i32,
    /// Earliest time the row is eligible for another purge attempt.
    pub cleanup_after: OffsetDateTime,
}

impl<'r> FromRow<'r, SqliteRow> for DeletedInstanceRow {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            partition_key: row.try_get("partition_key")?,
            study_instance_uid: row.try_get("study_instance_uid")?,
            series_instance_uid: row.try_get("series_instance_uid")?,
            sop_instance_uid: row.try_get("sop_instance_uid")?,
            watermark: row.try_get("watermark")?,
            deleted_date_time: nanos_column(row, "deleted_date_time")?,
            retry_count: row.try_get("retry_count")?,
            cleanup_after: nanos_column(row, "cleanup_after")?,
        })
    }
}

impl DeletedInstanceRow {
    pub fn versioned_identifier(&self) -> VersionedInstanceIdentifier {
        InstanceIdentifier::new(
            self.partition_key,
            self.study_instance_uid.clone(),
            self.series_instance_uid.clone(),
            self.sop_instance_uid.clone(),
        )
        .with_version(self.watermark)
    }
}

// =============================================================================
// Extended query tags
// =============================================================================

/// Registered extended query tag.
#[derive(Debug, Clone, FromRow)]
pub struct ExtendedQueryTagRow {
    /// Monotonic key; the highest live key is the active tag version.
    pub tag_key: i32,
    pub tag_path: String,
    pub tag_vr: String,
    pub tag_level: String,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Deletion jobs
// =============================================================================

/// Deletion job record.
#[derive(Debug, Clone)]
pub struct DeletionJobRow {
    pub job_id: Uuid,
    pub job_type: String,
    pub state: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    /// Serialized `DeletionCheckpoint`, absent before the first cycle.
    pub checkpoint_json: Option<String>,
    /// Serialized `DeletionStats`.
    pub stats_json: Option<String>,
}

impl<'r> FromRow<'r, SqliteRow> for DeletionJobRow {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            job_id: row.try_get("job_id")?,
            job_type: row.try_get("job_type")?,
            state: row.try_get("state")?,
            created_at: nanos_column(row, "created_at")?,
            updated_at: nanos_column(row, "updated_at")?,
            finished_at: optional_nanos_column(row, "finished_at")?,
            checkpoint_json: row.try_get("checkpoint_json")?,
            stats_json: row.try_get("stats_json")?,
        })
    }
}
