//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{
    DeletedInstanceRepo, DeletionJobRepo, ExtendedQueryTagRepo, InstanceRepo, PartitionRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    InstanceRepo
    + DeletedInstanceRepo
    + ExtendedQueryTagRepo
    + PartitionRepo
    + DeletionJobRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600); // 10 minutes default

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; using a single connection avoids
            // persistent "database is locked" failures under concurrent ingest and purge.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::warn!(
            query_timeout_secs = query_timeout_secs,
            "SQLite query timeout is advisory only - long queries may exceed timeout. \
             Deletion calls are still bounded by deletion.call_timeout_secs."
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::NewExtendedQueryTag;
    use pacs_core::{
        BatchRequest, IndexStatus, IndexedDataset, InstanceIdentifier, ObjectLocation,
        VersionedInstanceIdentifier, WatermarkRange, cleanup_backoff,
    };
    use sqlx::SqliteConnection;
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Reject a caller whose tag version is behind the registry.
    async fn check_tag_version(
        conn: &mut SqliteConnection,
        tag_version: Option<i32>,
    ) -> MetadataResult<()> {
        let Some(supplied) = tag_version else {
            return Ok(());
        };
        let current: Option<i32> =
            sqlx::query_scalar("SELECT MAX(tag_key) FROM extended_query_tags")
                .fetch_one(&mut *conn)
                .await?;
        let current = current.unwrap_or(0);
        if current > supplied {
            return Err(MetadataError::ExtendedQueryTagsOutOfDate { supplied, current });
        }
        Ok(())
    }

    fn is_unique_violation(err: &sqlx::Error, table: &str) -> bool {
        matches!(
            err,
            sqlx::Error::Database(db_err)
                if db_err.message().contains("UNIQUE constraint") && db_err.message().contains(table)
        )
    }

    impl SqliteStore {
        /// Move every live row matching the filter into `deleted_instances`.
        async fn soft_delete(
            &self,
            partition_key: i32,
            study_instance_uid: &str,
            series_instance_uid: Option<&str>,
            sop_instance_uid: Option<&str>,
            now: OffsetDateTime,
        ) -> MetadataResult<Vec<VersionedInstanceIdentifier>> {
            let mut tx = self.pool.begin().await?;

            let rows = sqlx::query_as::<_, InstanceRow>(
                r#"
                SELECT * FROM instances
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND (? IS NULL OR series_instance_uid = ?)
                  AND (? IS NULL OR sop_instance_uid = ?)
                ORDER BY watermark
                "#,
            )
            .bind(partition_key)
            .bind(study_instance_uid)
            .bind(series_instance_uid)
            .bind(series_instance_uid)
            .bind(sop_instance_uid)
            .bind(sop_instance_uid)
            .fetch_all(&mut *tx)
            .await?;

            if rows.is_empty() {
                let target = match (series_instance_uid, sop_instance_uid) {
                    (Some(series), Some(sop)) => MetadataError::InstanceNotFound(format!(
                        "{partition_key}/{study_instance_uid}/{series}/{sop}"
                    )),
                    (Some(series), None) => MetadataError::SeriesNotFound(format!(
                        "{partition_key}/{study_instance_uid}/{series}"
                    )),
                    _ => MetadataError::StudyNotFound(format!(
                        "{partition_key}/{study_instance_uid}"
                    )),
                };
                return Err(target);
            }

            let deleted_at = to_unix_nanos(now)?;
            for row in &rows {
                sqlx::query(
                    r#"
                    INSERT INTO deleted_instances
                        (partition_key, study_instance_uid, series_instance_uid, sop_instance_uid,
                         watermark, deleted_date_time, retry_count, cleanup_after)
                    VALUES (?, ?, ?, ?, ?, ?, 0, ?)
                    "#,
                )
                .bind(row.partition_key)
                .bind(&row.study_instance_uid)
                .bind(&row.series_instance_uid)
                .bind(&row.sop_instance_uid)
                .bind(row.watermark)
                .bind(deleted_at)
                .bind(deleted_at)
                .execute(&mut *tx)
                .await?;

                sqlx::query("DELETE FROM instances WHERE watermark = ?")
                    .bind(row.watermark)
                    .execute(&mut *tx)
                    .await?;
            }

            // Aggregates go with their last child
            sqlx::query(
                r#"
                DELETE FROM series
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND NOT EXISTS (
                    SELECT 1 FROM instances i
                    WHERE i.partition_key = series.partition_key
                      AND i.study_instance_uid = series.study_instance_uid
                      AND i.series_instance_uid = series.series_instance_uid
                  )
                "#,
            )
            .bind(partition_key)
            .bind(study_instance_uid)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                DELETE FROM studies
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND NOT EXISTS (
                    SELECT 1 FROM instances i
                    WHERE i.partition_key = studies.partition_key
                      AND i.study_instance_uid = studies.study_instance_uid
                  )
                "#,
            )
            .bind(partition_key)
            .bind(study_instance_uid)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            tracing::debug!(
                partition_key,
                study_instance_uid,
                deleted = rows.len(),
                "Soft-deleted instances"
            );

            Ok(rows.iter().map(InstanceRow::versioned_identifier).collect())
        }
    }

    #[async_trait]
    impl InstanceRepo for SqliteStore {
        async fn begin_create_instance(
            &self,
            partition_key: i32,
            dataset: &IndexedDataset,
            tag_version: Option<i32>,
        ) -> MetadataResult<i64> {
            let identifier = dataset.identifier(partition_key);
            identifier.validate()?;
            let now = OffsetDateTime::now_utc();

            let mut tx = self.pool.begin().await?;

            check_tag_version(&mut *tx, tag_version).await?;

            let partition_exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM partitions WHERE partition_key = ?)",
            )
            .bind(partition_key)
            .fetch_one(&mut *tx)
            .await?;
            if !partition_exists {
                return Err(MetadataError::NotFound(format!(
                    "partition_key {partition_key} not found"
                )));
            }

            let existing: Option<i32> = sqlx::query_scalar(
                r#"
                SELECT status FROM instances
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND series_instance_uid = ? AND sop_instance_uid = ?
                "#,
            )
            .bind(partition_key)
            .bind(&identifier.study_instance_uid)
            .bind(&identifier.series_instance_uid)
            .bind(&identifier.sop_instance_uid)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(status) = existing {
                return Err(match IndexStatus::from_i32(status)? {
                    IndexStatus::Creating => {
                        MetadataError::PendingInstanceCreation(identifier.to_string())
                    }
                    IndexStatus::Created => {
                        MetadataError::InstanceAlreadyExists(identifier.to_string())
                    }
                });
            }

            sqlx::query("UPDATE watermark_sequence SET current_value = current_value + 1 WHERE id = 1")
                .execute(&mut *tx)
                .await?;
            let watermark: i64 =
                sqlx::query_scalar("SELECT current_value FROM watermark_sequence WHERE id = 1")
                    .fetch_one(&mut *tx)
                    .await?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO instances
                    (watermark, partition_key, study_instance_uid, series_instance_uid,
                     sop_instance_uid, status, file_path, etag, created_date, last_status_updated_date)
                VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?)
                "#,
            )
            .bind(watermark)
            .bind(partition_key)
            .bind(&identifier.study_instance_uid)
            .bind(&identifier.series_instance_uid)
            .bind(&identifier.sop_instance_uid)
            .bind(IndexStatus::Creating.as_i32())
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                // Lost a race with another writer holding the identity
                Err(e) if is_unique_violation(&e, "instances") => {
                    return Err(MetadataError::PendingInstanceCreation(
                        identifier.to_string(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }

            let study = &dataset.study;
            sqlx::query(
                r#"
                INSERT INTO studies
                    (partition_key, study_instance_uid, patient_id, patient_name,
                     referring_physician_name, study_date, study_description,
                     accession_number, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (partition_key, study_instance_uid) DO UPDATE SET
                    patient_id = excluded.patient_id,
                    patient_name = excluded.patient_name,
                    referring_physician_name = excluded.referring_physician_name,
                    study_date = excluded.study_date,
                    study_description = excluded.study_description,
                    accession_number = excluded.accession_number,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(partition_key)
            .bind(&identifier.study_instance_uid)
            .bind(&study.patient_id)
            .bind(&study.patient_name)
            .bind(&study.referring_physician_name)
            .bind(study.study_date)
            .bind(&study.study_description)
            .bind(&study.accession_number)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let series = &dataset.series;
            sqlx::query(
                r#"
                INSERT INTO series
                    (partition_key, study_instance_uid, series_instance_uid, modality,
                     performed_procedure_step_start_date, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (partition_key, study_instance_uid, series_instance_uid) DO UPDATE SET
                    modality = excluded.modality,
                    performed_procedure_step_start_date = excluded.performed_procedure_step_start_date,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(partition_key)
            .bind(&identifier.study_instance_uid)
            .bind(&identifier.series_instance_uid)
            .bind(&series.modality)
            .bind(series.performed_procedure_step_start_date)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            tracing::debug!(watermark, instance = %identifier, "Began instance creation");
            Ok(watermark)
        }

        async fn end_create_instance(
            &self,
            identifier: &InstanceIdentifier,
            watermark: i64,
            tag_version: Option<i32>,
            location: &ObjectLocation,
        ) -> MetadataResult<()> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                r#"
                UPDATE instances
                SET status = ?, file_path = ?, etag = ?, last_status_updated_date = ?
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND series_instance_uid = ? AND sop_instance_uid = ?
                  AND watermark = ? AND status = ?
                "#,
            )
            .bind(IndexStatus::Created.as_i32())
            .bind(&location.file_path)
            .bind(&location.etag)
            .bind(now)
            .bind(identifier.partition_key)
            .bind(&identifier.study_instance_uid)
            .bind(&identifier.series_instance_uid)
            .bind(&identifier.sop_instance_uid)
            .bind(watermark)
            .bind(IndexStatus::Creating.as_i32())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::InstanceNotFound(format!(
                    "{identifier}@{watermark}"
                )));
            }

            check_tag_version(&mut *tx, tag_version).await?;

            tx.commit().await?;
            Ok(())
        }

        async fn get_instance(
            &self,
            identifier: &InstanceIdentifier,
        ) -> MetadataResult<Option<InstanceRow>> {
            let row = sqlx::query_as::<_, InstanceRow>(
                r#"
                SELECT * FROM instances
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND series_instance_uid = ? AND sop_instance_uid = ?
                "#,
            )
            .bind(identifier.partition_key)
            .bind(&identifier.study_instance_uid)
            .bind(&identifier.series_instance_uid)
            .bind(&identifier.sop_instance_uid)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_instance_identifiers(
            &self,
            partition_key: i32,
            study_instance_uid: &str,
            series_instance_uid: Option<&str>,
            sop_instance_uid: Option<&str>,
            status: IndexStatus,
        ) -> MetadataResult<Vec<VersionedInstanceIdentifier>> {
            let rows = sqlx::query_as::<_, InstanceRow>(
                r#"
                SELECT * FROM instances
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND (? IS NULL OR series_instance_uid = ?)
                  AND (? IS NULL OR sop_instance_uid = ?)
                  AND status = ?
                ORDER BY watermark
                "#,
            )
            .bind(partition_key)
            .bind(study_instance_uid)
            .bind(series_instance_uid)
            .bind(series_instance_uid)
            .bind(sop_instance_uid)
            .bind(sop_instance_uid)
            .bind(status.as_i32())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.iter().map(InstanceRow::versioned_identifier).collect())
        }

        async fn get_study_metadata(
            &self,
            partition_key: i32,
            study_instance_uid: &str,
        ) -> MetadataResult<Option<StudyRow>> {
            let row = sqlx::query_as::<_, StudyRow>(
                "SELECT * FROM studies WHERE partition_key = ? AND study_instance_uid = ?",
            )
            .bind(partition_key)
            .bind(study_instance_uid)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_series_metadata(
            &self,
            partition_key: i32,
            study_instance_uid: &str,
            series_instance_uid: &str,
        ) -> MetadataResult<Option<SeriesRow>> {
            let row = sqlx::query_as::<_, SeriesRow>(
                "SELECT * FROM series WHERE partition_key = ? AND study_instance_uid = ? AND series_instance_uid = ?",
            )
            .bind(partition_key)
            .bind(study_instance_uid)
            .bind(series_instance_uid)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn delete_instance(
            &self,
            identifier: &InstanceIdentifier,
            now: OffsetDateTime,
        ) -> MetadataResult<Vec<VersionedInstanceIdentifier>> {
            self.soft_delete(
                identifier.partition_key,
                &identifier.study_instance_uid,
                Some(&identifier.series_instance_uid),
                Some(&identifier.sop_instance_uid),
                now,
            )
            .await
        }

        async fn delete_series(
            &self,
            partition_key: i32,
            study_instance_uid: &str,
            series_instance_uid: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<Vec<VersionedInstanceIdentifier>> {
            self.soft_delete(
                partition_key,
                study_instance_uid,
                Some(series_instance_uid),
                None,
                now,
            )
            .await
        }

        async fn delete_study(
            &self,
            partition_key: i32,
            study_instance_uid: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<Vec<VersionedInstanceIdentifier>> {
            self.soft_delete(partition_key, study_instance_uid, None, None, now)
                .await
        }
    }

    #[async_trait]
    impl DeletedInstanceRepo for SqliteStore {
        async fn get_deletable_batches(
            &self,
            request: &BatchRequest,
            now: OffsetDateTime,
        ) -> MetadataResult<Vec<WatermarkRange>> {
            let per_cycle =
                u64::from(request.batch_size) * u64::from(request.max_parallel_batches);
            if per_cycle == 0 {
                return Ok(Vec::new());
            }
            let limit = i64::try_from(per_cycle).unwrap_or(i64::MAX);
            let deleted_until = request.deleted_until.map(to_unix_nanos).transpose()?;

            let watermarks: Vec<i64> = sqlx::query_scalar(
                r#"
                SELECT watermark FROM deleted_instances
                WHERE cleanup_after <= ?
                  AND (? IS NULL OR watermark <= ?)
                  AND (? IS NULL OR deleted_date_time <= ?)
                ORDER BY watermark DESC
                LIMIT ?
                "#,
            )
            .bind(to_unix_nanos(now)?)
            .bind(request.max_watermark)
            .bind(request.max_watermark)
            .bind(deleted_until)
            .bind(deleted_until)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

            Ok(WatermarkRange::partition_descending(
                &watermarks,
                request.batch_size as usize,
            ))
        }

        async fn get_deleted_instances(
            &self,
            range: WatermarkRange,
            now: OffsetDateTime,
            deleted_until: Option<OffsetDateTime>,
        ) -> MetadataResult<Vec<DeletedInstanceRow>> {
            let deleted_until = deleted_until.map(to_unix_nanos).transpose()?;
            let rows = sqlx::query_as::<_, DeletedInstanceRow>(
                r#"
                SELECT * FROM deleted_instances
                WHERE watermark BETWEEN ? AND ? AND cleanup_after <= ?
                  AND (? IS NULL OR deleted_date_time <= ?)
                ORDER BY watermark DESC
                "#,
            )
            .bind(range.start())
            .bind(range.end())
            .bind(to_unix_nanos(now)?)
            .bind(deleted_until)
            .bind(deleted_until)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_deleted_instance(
            &self,
            identifier: &VersionedInstanceIdentifier,
        ) -> MetadataResult<Option<DeletedInstanceRow>> {
            let id = &identifier.identifier;
            let row = sqlx::query_as::<_, DeletedInstanceRow>(
                r#"
                SELECT * FROM deleted_instances
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND series_instance_uid = ? AND sop_instance_uid = ? AND watermark = ?
                "#,
            )
            .bind(id.partition_key)
            .bind(&id.study_instance_uid)
            .bind(&id.series_instance_uid)
            .bind(&id.sop_instance_uid)
            .bind(identifier.version)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn purge_deleted_instance(
            &self,
            identifier: &VersionedInstanceIdentifier,
        ) -> MetadataResult<bool> {
            let id = &identifier.identifier;
            let result = sqlx::query(
                r#"
                DELETE FROM deleted_instances
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND series_instance_uid = ? AND sop_instance_uid = ? AND watermark = ?
                "#,
            )
            .bind(id.partition_key)
            .bind(&id.study_instance_uid)
            .bind(&id.series_instance_uid)
            .bind(&id.sop_instance_uid)
            .bind(identifier.version)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn increment_deleted_instance_retry(
            &self,
            identifier: &VersionedInstanceIdentifier,
            now: OffsetDateTime,
            base_backoff: time::Duration,
        ) -> MetadataResult<i32> {
            let id = &identifier.identifier;
            let mut tx = self.pool.begin().await?;

            let current: Option<(i32, i64)> = sqlx::query_as(
                r#"
                SELECT retry_count, cleanup_after FROM deleted_instances
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND series_instance_uid = ? AND sop_instance_uid = ? AND watermark = ?
                "#,
            )
            .bind(id.partition_key)
            .bind(&id.study_instance_uid)
            .bind(&id.series_instance_uid)
            .bind(&id.sop_instance_uid)
            .bind(identifier.version)
            .fetch_optional(&mut *tx)
            .await?;

            let Some((retry_count, cleanup_after)) = current else {
                return Err(MetadataError::NotFound(format!(
                    "deleted instance {identifier} not found"
                )));
            };

            let retry_count = retry_count.saturating_add(1);
            let next_eligible = now + cleanup_backoff(base_backoff, retry_count);
            let cleanup_after = from_unix_nanos(cleanup_after)?.max(next_eligible);

            sqlx::query(
                r#"
                UPDATE deleted_instances SET retry_count = ?, cleanup_after = ?
                WHERE partition_key = ? AND study_instance_uid = ?
                  AND series_instance_uid = ? AND sop_instance_uid = ? AND watermark = ?
                "#,
            )
            .bind(retry_count)
            .bind(to_unix_nanos(cleanup_after)?)
            .bind(id.partition_key)
            .bind(&id.study_instance_uid)
            .bind(&id.series_instance_uid)
            .bind(&id.sop_instance_uid)
            .bind(identifier.version)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(retry_count)
        }

        async fn retrieve_num_exhausted_deleted_instance_attempts(
            &self,
            max_retries: i32,
        ) -> MetadataResult<i64> {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM deleted_instances WHERE retry_count >= ?")
                    .bind(max_retries)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count)
        }

        async fn get_oldest_deleted(&self) -> MetadataResult<OffsetDateTime> {
            let oldest: Option<i64> =
                sqlx::query_scalar("SELECT MIN(deleted_date_time) FROM deleted_instances")
                    .fetch_one(&self.pool)
                    .await?;
            match oldest {
                Some(nanos) => from_unix_nanos(nanos),
                None => Ok(OffsetDateTime::now_utc()),
            }
        }
    }

    #[async_trait]
    impl ExtendedQueryTagRepo for SqliteStore {
        async fn add_extended_query_tags(
            &self,
            tags: &[NewExtendedQueryTag],
        ) -> MetadataResult<Vec<ExtendedQueryTagRow>> {
            let now = OffsetDateTime::now_utc();
            let mut tx = self.pool.begin().await?;
            let mut added = Vec::with_capacity(tags.len());

            for tag in tags {
                let inserted = sqlx::query(
                    "INSERT INTO extended_query_tags (tag_path, tag_vr, tag_level, created_at) VALUES (?, ?, ?, ?)",
                )
                .bind(&tag.path)
                .bind(&tag.vr)
                .bind(&tag.level)
                .bind(now)
                .execute(&mut *tx)
                .await;

                let tag_key = match inserted {
                    Ok(result) => i32::try_from(result.last_insert_rowid()).map_err(|_| {
                        MetadataError::Internal("extended query tag key overflow".to_string())
                    })?,
                    Err(e) if is_unique_violation(&e, "extended_query_tags") => {
                        return Err(MetadataError::AlreadyExists(format!(
                            "extended query tag '{}' already exists",
                            tag.path
                        )));
                    }
                    Err(e) => return Err(e.into()),
                };

                added.push(ExtendedQueryTagRow {
                    tag_key,
                    tag_path: tag.path.clone(),
                    tag_vr: tag.vr.clone(),
                    tag_level: tag.level.clone(),
                    created_at: now,
                });
            }

            tx.commit().await?;
            Ok(added)
        }

        async fn get_extended_query_tags(&self) -> MetadataResult<Vec<ExtendedQueryTagRow>> {
            let rows = sqlx::query_as::<_, ExtendedQueryTagRow>(
                "SELECT * FROM extended_query_tags ORDER BY tag_key",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_max_tag_key(&self) -> MetadataResult<Option<i32>> {
            let key: Option<i32> =
                sqlx::query_scalar("SELECT MAX(tag_key) FROM extended_query_tags")
                    .fetch_one(&self.pool)
                    .await?;
            Ok(key)
        }

        async fn delete_extended_query_tag(&self, path: &str) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM extended_query_tags WHERE tag_path = ?")
                .bind(path)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "extended query tag '{path}' not found"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PartitionRepo for SqliteStore {
        async fn add_partition(&self, partition_name: &str) -> MetadataResult<PartitionRow> {
            let now = OffsetDateTime::now_utc();
            let inserted = sqlx::query(
                "INSERT INTO partitions (partition_name, created_date) VALUES (?, ?)",
            )
            .bind(partition_name)
            .bind(now)
            .execute(&self.pool)
            .await;

            let partition_key = match inserted {
                Ok(result) => i32::try_from(result.last_insert_rowid()).map_err(|_| {
                    MetadataError::Internal("partition key overflow".to_string())
                })?,
                Err(e) if is_unique_violation(&e, "partitions") => {
                    return Err(MetadataError::AlreadyExists(format!(
                        "partition '{partition_name}' already exists"
                    )));
                }
                Err(e) => return Err(e.into()),
            };

            Ok(PartitionRow {
                partition_key,
                partition_name: partition_name.to_string(),
                created_date: now,
            })
        }

        async fn get_partition_by_name(
            &self,
            partition_name: &str,
        ) -> MetadataResult<Option<PartitionRow>> {
            let row = sqlx::query_as::<_, PartitionRow>(
                "SELECT * FROM partitions WHERE partition_name = ?",
            )
            .bind(partition_name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_partitions(&self) -> MetadataResult<Vec<PartitionRow>> {
            let rows =
                sqlx::query_as::<_, PartitionRow>("SELECT * FROM partitions ORDER BY partition_key")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl DeletionJobRepo for SqliteStore {
        async fn create_deletion_job(&self, job: &DeletionJobRow) -> MetadataResult<()> {
            match sqlx::query(
                r#"
                INSERT INTO deletion_jobs (job_id, job_type, state, created_at, updated_at, finished_at, checkpoint_json, stats_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(job.job_id)
            .bind(&job.job_type)
            .bind(&job.state)
            .bind(to_unix_nanos(job.created_at)?)
            .bind(to_unix_nanos(job.updated_at)?)
            .bind(job.finished_at.map(to_unix_nanos).transpose()?)
            .bind(&job.checkpoint_json)
            .bind(&job.stats_json)
            .execute(&self.pool)
            .await
            {
                Ok(_) => Ok(()),
                // SQLite names either the columns or the partial index in the message
                Err(e) if is_unique_violation(&e, "deletion_jobs") => {
                    Err(MetadataError::Constraint(format!(
                        "another {} job is already active",
                        job.job_type
                    )))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_deletion_job(&self, job_id: Uuid) -> MetadataResult<Option<DeletionJobRow>> {
            let row =
                sqlx::query_as::<_, DeletionJobRow>("SELECT * FROM deletion_jobs WHERE job_id = ?")
                    .bind(job_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn save_deletion_checkpoint(
            &self,
            job_id: Uuid,
            checkpoint_json: &str,
            stats_json: Option<&str>,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE deletion_jobs SET checkpoint_json = ?, stats_json = COALESCE(?, stats_json), updated_at = ? WHERE job_id = ?",
            )
            .bind(checkpoint_json)
            .bind(stats_json)
            .bind(to_unix_nanos(OffsetDateTime::now_utc())?)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "deletion job {job_id} not found"
                )));
            }
            Ok(())
        }

        async fn update_deletion_job_state(
            &self,
            job_id: Uuid,
            state: &str,
            finished_at: Option<OffsetDateTime>,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE deletion_jobs SET state = ?, finished_at = ?, updated_at = ? WHERE job_id = ?",
            )
            .bind(state)
            .bind(finished_at.map(to_unix_nanos).transpose()?)
            .bind(to_unix_nanos(OffsetDateTime::now_utc())?)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "deletion job {job_id} not found"
                )));
            }
            Ok(())
        }

        async fn get_recent_deletion_jobs(
            &self,
            limit: u32,
        ) -> MetadataResult<Vec<DeletionJobRow>> {
            let rows = sqlx::query_as::<_, DeletionJobRow>(
                "SELECT * FROM deletion_jobs ORDER BY created_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_active_deletion_jobs(&self) -> MetadataResult<Vec<DeletionJobRow>> {
            let rows = sqlx::query_as::<_, DeletionJobRow>(
                "SELECT * FROM deletion_jobs WHERE state IN ('queued', 'running') ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Partitions
CREATE TABLE IF NOT EXISTS partitions (
    partition_key INTEGER PRIMARY KEY AUTOINCREMENT,
    partition_name TEXT NOT NULL UNIQUE,
    created_date TEXT NOT NULL
);
INSERT OR IGNORE INTO partitions (partition_key, partition_name, created_date)
VALUES (1, 'default', CURRENT_TIMESTAMP);

-- Watermark allocation; never reused, even after deletes
CREATE TABLE IF NOT EXISTS watermark_sequence (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    current_value INTEGER NOT NULL
);
INSERT OR IGNORE INTO watermark_sequence (id, current_value) VALUES (1, 0);

-- Study aggregates
CREATE TABLE IF NOT EXISTS studies (
    partition_key INTEGER NOT NULL REFERENCES partitions(partition_key),
    study_instance_uid TEXT NOT NULL,
    patient_id TEXT,
    patient_name TEXT,
    referring_physician_name TEXT,
    study_date TEXT,
    study_description TEXT,
    accession_number TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (partition_key, study_instance_uid)
);

-- Series aggregates
CREATE TABLE IF NOT EXISTS series (
    partition_key INTEGER NOT NULL,
    study_instance_uid TEXT NOT NULL,
    series_instance_uid TEXT NOT NULL,
    modality TEXT,
    performed_procedure_step_start_date TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (partition_key, study_instance_uid, series_instance_uid)
);

-- Live instances
CREATE TABLE IF NOT EXISTS instances (
    watermark INTEGER PRIMARY KEY,
    partition_key INTEGER NOT NULL REFERENCES partitions(partition_key),
    study_instance_uid TEXT NOT NULL,
    series_instance_uid TEXT NOT NULL,
    sop_instance_uid TEXT NOT NULL,
    status INTEGER NOT NULL,
    file_path TEXT,
    etag TEXT,
    created_date TEXT NOT NULL,
    last_status_updated_date TEXT NOT NULL
);
-- One live row per identity; this is what serializes concurrent creates
CREATE UNIQUE INDEX IF NOT EXISTS idx_instances_identity
ON instances(partition_key, study_instance_uid, series_instance_uid, sop_instance_uid);

-- Soft-delete backlog
CREATE TABLE IF NOT EXISTS deleted_instances (
    partition_key INTEGER NOT NULL,
    study_instance_uid TEXT NOT NULL,
    series_instance_uid TEXT NOT NULL,
    sop_instance_uid TEXT NOT NULL,
    watermark INTEGER NOT NULL,
    -- Unix nanoseconds so eligibility compares instants
    deleted_date_time INTEGER NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    cleanup_after INTEGER NOT NULL,
    PRIMARY KEY (partition_key, study_instance_uid, series_instance_uid, sop_instance_uid, watermark)
);
CREATE INDEX IF NOT EXISTS idx_deleted_instances_watermark ON deleted_instances(watermark, cleanup_after);
CREATE INDEX IF NOT EXISTS idx_deleted_instances_deleted ON deleted_instances(deleted_date_time);

-- Extended query tags; AUTOINCREMENT keeps keys monotonic across deletes
CREATE TABLE IF NOT EXISTS extended_query_tags (
    tag_key INTEGER PRIMARY KEY AUTOINCREMENT,
    tag_path TEXT NOT NULL UNIQUE,
    tag_vr TEXT NOT NULL,
    tag_level TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Deletion jobs
CREATE TABLE IF NOT EXISTS deletion_jobs (
    job_id BLOB PRIMARY KEY,
    job_type TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    finished_at INTEGER,
    checkpoint_json TEXT,
    stats_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_deletion_jobs_state ON deletion_jobs(state);
-- At most one queued or running job per type
CREATE UNIQUE INDEX IF NOT EXISTS idx_deletion_jobs_type_active
ON deletion_jobs(job_type)
WHERE state IN ('queued', 'running');
"#;
