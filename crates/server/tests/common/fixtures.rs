//! Test fixtures for instances, backlogs, and jobs.

use bytes::Bytes;
use pacs_core::{
    DEFAULT_PARTITION_KEY, DELETED_INSTANCE_CLEANUP, DeletionJobId, DeletionJobState,
    IndexedDataset, VersionedInstanceIdentifier,
};
use pacs_metadata::MetadataStore;
use pacs_metadata::models::DeletionJobRow;
use pacs_metadata::repos::{DeletionJobRepo, InstanceRepo};
use pacs_storage::InstanceFileStore;
use time::OffsetDateTime;

/// Dataset with UIDs derived from short labels.
#[allow(dead_code)]
pub fn dataset(study: &str, series: &str, sop: &str) -> IndexedDataset {
    IndexedDataset::new(
        format!("1.2.826.0.1.{study}"),
        format!("1.2.826.0.1.{study}.{series}"),
        format!("1.2.826.0.1.{study}.{series}.{sop}"),
    )
}

/// Bytes standing in for a DICOM Part 10 file.
#[allow(dead_code)]
pub fn instance_bytes(label: &str) -> Bytes {
    let mut data = vec![0u8; 128];
    data.extend_from_slice(b"DICM");
    data.extend_from_slice(label.as_bytes());
    Bytes::from(data)
}

/// Run the full create path: begin, store the bytes, commit.
///
/// Returns the watermark the instance was stored under.
#[allow(dead_code)]
pub async fn ingest_instance(
    metadata: &dyn MetadataStore,
    files: &InstanceFileStore,
    dataset: &IndexedDataset,
) -> i64 {
    let watermark = metadata
        .begin_create_instance(DEFAULT_PARTITION_KEY, dataset, None)
        .await
        .expect("begin create failed");
    let location = files
        .store_file(watermark, instance_bytes(&dataset.sop_instance_uid))
        .await
        .expect("store file failed");
    metadata
        .end_create_instance(
            &dataset.identifier(DEFAULT_PARTITION_KEY),
            watermark,
            None,
            &location,
        )
        .await
        .expect("end create failed");
    watermark
}

/// Ingest `count` instances into one series, then soft-delete the series.
///
/// Returns the deleted identifiers in watermark order.
#[allow(dead_code)]
pub async fn deleted_backlog(
    metadata: &dyn MetadataStore,
    files: &InstanceFileStore,
    study: &str,
    count: usize,
) -> Vec<VersionedInstanceIdentifier> {
    let mut series_uid = String::new();
    let mut study_uid = String::new();
    for i in 0..count {
        let ds = dataset(study, "1", &i.to_string());
        series_uid = ds.series_instance_uid.clone();
        study_uid = ds.study_instance_uid.clone();
        ingest_instance(metadata, files, &ds).await;
    }
    metadata
        .delete_series(
            DEFAULT_PARTITION_KEY,
            &study_uid,
            &series_uid,
            OffsetDateTime::now_utc(),
        )
        .await
        .expect("delete series failed")
}

/// Insert a cleanup job row in `state`.
#[allow(dead_code)]
pub async fn insert_job(
    metadata: &dyn MetadataStore,
    state: DeletionJobState,
    checkpoint_json: Option<String>,
) -> DeletionJobId {
    let job_id = DeletionJobId::new();
    let now = OffsetDateTime::now_utc();
    metadata
        .create_deletion_job(&DeletionJobRow {
            job_id: *job_id.as_uuid(),
            job_type: DELETED_INSTANCE_CLEANUP.to_string(),
            state: state.as_str().to_string(),
            created_at: now,
            updated_at: now,
            finished_at: state.is_terminal().then_some(now),
            checkpoint_json,
            stats_json: None,
        })
        .await
        .expect("create job failed");
    job_id
}
