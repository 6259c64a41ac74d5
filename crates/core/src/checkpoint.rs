//! Durable progress state for the batched deletion job.
//!
//! A job repeatedly asks the index for the next batches of soft-deleted
//! watermarks below its completed boundary, purges them, and records the
//! new boundary here. Everything needed to resume after a restart lives in
//! [`DeletionCheckpoint`]; the job never keeps history beyond it.

use crate::watermark::WatermarkRange;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Batch sizing for one deletion cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchingOptions {
    /// Maximum watermarks per batch.
    pub size: u32,
    /// Maximum batches processed concurrently in one cycle.
    pub max_parallel_count: u32,
}

impl BatchingOptions {
    pub fn new(size: u32, max_parallel_count: u32) -> crate::Result<Self> {
        let options = Self {
            size,
            max_parallel_count,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.size == 0 {
            return Err(crate::Error::InvalidBatching(
                "batch size must be greater than zero".to_string(),
            ));
        }
        if self.max_parallel_count == 0 {
            return Err(crate::Error::InvalidBatching(
                "max parallel count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Most watermarks a single cycle can cover.
    pub fn max_watermarks_per_cycle(&self) -> u64 {
        u64::from(self.size) * u64::from(self.max_parallel_count)
    }
}

impl Default for BatchingOptions {
    fn default() -> Self {
        Self {
            size: 100,
            max_parallel_count: 4,
        }
    }
}

/// Arguments for fetching the next deletable batches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Inclusive upper bound; `None` means the whole backlog.
    pub max_watermark: Option<i64>,
    /// Only rows soft-deleted at or before this instant, once the job start
    /// time is known.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_until: Option<OffsetDateTime>,
    pub batch_size: u32,
    pub max_parallel_batches: u32,
}

/// Persisted state of an in-flight deletion job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCheckpoint {
    /// Schema version of the serialized form.
    #[serde(default = "default_checkpoint_version")]
    pub version: u8,
    /// Watermarks handled so far, `None` before the first successful cycle.
    pub completed: Option<WatermarkRange>,
    /// Creation time of the owning job, recorded once.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_time: Option<OffsetDateTime>,
    pub batching: BatchingOptions,
}

fn default_checkpoint_version() -> u8 {
    DeletionCheckpoint::VERSION
}

impl DeletionCheckpoint {
    /// Current checkpoint schema version.
    pub const VERSION: u8 = 1;

    /// Fresh checkpoint for a job that has not processed anything.
    pub fn new(batching: BatchingOptions) -> Self {
        Self {
            version: Self::VERSION,
            completed: None,
            created_time: None,
            batching,
        }
    }

    /// Deserialize a checkpoint from JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let checkpoint: Self =
            serde_json::from_str(json).map_err(|e| crate::Error::Serialization(e.to_string()))?;
        if checkpoint.version != Self::VERSION {
            return Err(crate::Error::Serialization(format!(
                "unsupported checkpoint version {} (expected {})",
                checkpoint.version,
                Self::VERSION
            )));
        }
        checkpoint.batching.validate()?;
        Ok(checkpoint)
    }

    /// Serialize the checkpoint to JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Arguments for the next batch fetch.
    ///
    /// Once a boundary is recorded, only watermarks strictly below
    /// `completed.start` are requested. The backlog is also bounded by the
    /// job start time, so instances deleted while the job runs are left to
    /// a later job.
    pub fn batch_request(&self) -> BatchRequest {
        BatchRequest {
            max_watermark: self.completed.map(|c| c.start() - 1),
            deleted_until: self.created_time,
            batch_size: self.batching.size,
            max_parallel_batches: self.batching.max_parallel_count,
        }
    }

    /// Whether the job start time still has to be looked up.
    pub fn needs_created_time(&self) -> bool {
        self.created_time.is_none()
    }

    /// Checkpoint after `batches` have all settled.
    ///
    /// `batches` are ordered from the highest watermark downward, as returned
    /// by the index. Returns `None` when there was nothing to process, which
    /// ends the job.
    pub fn advance(
        &self,
        batches: &[WatermarkRange],
        created_time: OffsetDateTime,
    ) -> Option<DeletionCheckpoint> {
        let low = batches.iter().map(WatermarkRange::start).min()?;
        let high = match self.completed {
            Some(completed) => completed.end(),
            None => batches.iter().map(WatermarkRange::end).max()?,
        };
        let completed = WatermarkRange::new(low, high.max(low)).ok()?;

        Some(DeletionCheckpoint {
            version: Self::VERSION,
            completed: Some(completed),
            created_time: Some(self.created_time.unwrap_or(created_time)),
            batching: self.batching,
        })
    }
}
