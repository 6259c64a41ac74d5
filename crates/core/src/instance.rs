//! Instance identity, lifecycle status, and indexed dataset attributes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition key used when no partition is specified.
pub const DEFAULT_PARTITION_KEY: i32 = 1;

/// Name of the partition seeded with [`DEFAULT_PARTITION_KEY`].
pub const DEFAULT_PARTITION_NAME: &str = "default";

/// Maximum UID length allowed by the DICOM standard.
pub const MAX_UID_LENGTH: usize = 64;

/// Validate a study, series, or SOP instance UID.
///
/// UIDs are dot-separated numeric components, at most 64 characters,
/// with no leading zeros in multi-digit components.
pub fn validate_uid(uid: &str) -> crate::Result<()> {
    if uid.is_empty() || uid.len() > MAX_UID_LENGTH {
        return Err(crate::Error::InvalidUid(format!(
            "UID must be 1-{MAX_UID_LENGTH} characters: {uid:?}"
        )));
    }
    for component in uid.split('.') {
        if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
            return Err(crate::Error::InvalidUid(format!(
                "UID components must be non-empty digit runs: {uid:?}"
            )));
        }
        if component.len() > 1 && component.starts_with('0') {
            return Err(crate::Error::InvalidUid(format!(
                "UID component has a leading zero: {uid:?}"
            )));
        }
    }
    Ok(())
}

/// Identity of one instance within a partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceIdentifier {
    pub partition_key: i32,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
}

impl InstanceIdentifier {
    pub fn new(
        partition_key: i32,
        study_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
    ) -> Self {
        Self {
            partition_key,
            study_instance_uid: study_instance_uid.into(),
            series_instance_uid: series_instance_uid.into(),
            sop_instance_uid: sop_instance_uid.into(),
        }
    }

    /// Validate all three UIDs.
    pub fn validate(&self) -> crate::Result<()> {
        validate_uid(&self.study_instance_uid)?;
        validate_uid(&self.series_instance_uid)?;
        validate_uid(&self.sop_instance_uid)
    }

    /// Pair this identity with a watermark.
    pub fn with_version(self, version: i64) -> VersionedInstanceIdentifier {
        VersionedInstanceIdentifier {
            identifier: self,
            version,
        }
    }
}

impl fmt::Display for InstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.partition_key,
            self.study_instance_uid,
            self.series_instance_uid,
            self.sop_instance_uid
        )
    }
}

/// An instance identity at a specific watermark.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedInstanceIdentifier {
    #[serde(flatten)]
    pub identifier: InstanceIdentifier,
    /// Watermark of this revision; the object store key.
    pub version: i64,
}

impl fmt::Display for VersionedInstanceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.identifier, self.version)
    }
}

/// Lifecycle status of a live instance row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    /// Row allocated by begin-create; bytes not yet committed.
    Creating,
    /// Bytes committed and extended tags validated.
    Created,
}

impl IndexStatus {
    /// Stored integer representation.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Creating => 0,
            Self::Created => 1,
        }
    }

    pub fn from_i32(value: i32) -> crate::Result<Self> {
        match value {
            0 => Ok(Self::Creating),
            1 => Ok(Self::Created),
            other => Err(crate::Error::InvalidIndexStatus(other)),
        }
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Created => write!(f, "created"),
        }
    }
}

/// Study-level attributes aggregated across a study's instances.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyAttributes {
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub referring_physician_name: Option<String>,
    pub study_date: Option<time::Date>,
    pub study_description: Option<String>,
    pub accession_number: Option<String>,
}

/// Series-level attributes aggregated across a series' instances.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesAttributes {
    pub modality: Option<String>,
    pub performed_procedure_step_start_date: Option<time::Date>,
}

/// The indexable subset of an incoming dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedDataset {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    #[serde(default)]
    pub study: StudyAttributes,
    #[serde(default)]
    pub series: SeriesAttributes,
}

impl IndexedDataset {
    pub fn new(
        study_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
        sop_instance_uid: impl Into<String>,
    ) -> Self {
        Self {
            study_instance_uid: study_instance_uid.into(),
            series_instance_uid: series_instance_uid.into(),
            sop_instance_uid: sop_instance_uid.into(),
            study: StudyAttributes::default(),
            series: SeriesAttributes::default(),
        }
    }

    /// Identity of this dataset within `partition_key`.
    pub fn identifier(&self, partition_key: i32) -> InstanceIdentifier {
        InstanceIdentifier::new(
            partition_key,
            self.study_instance_uid.clone(),
            self.series_instance_uid.clone(),
            self.sop_instance_uid.clone(),
        )
    }
}

/// Where committed bytes landed in the object store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub file_path: String,
    pub etag: String,
}
