//! Deletion job identity, state, and statistics.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a deletion job.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeletionJobId(Uuid);

impl DeletionJobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidJob(format!("invalid job ID: {e}")))
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeletionJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeletionJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeletionJobId({})", self.0)
    }
}

impl fmt::Display for DeletionJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job kind stored with each job record.
pub const DELETED_INSTANCE_CLEANUP: &str = "deleted_instance_cleanup";

/// Deletion job state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionJobState {
    /// Recorded but not yet picked up by a worker.
    Queued,
    /// A worker is running cycles.
    Running,
    /// The backlog below the job's boundary was drained.
    Finished,
    /// A cycle failed or the worker died; checkpoint kept for inspection.
    Failed,
}

impl DeletionJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::InvalidJob(format!("unknown job state: {other}"))),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for DeletionJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running totals for a deletion job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionStats {
    /// Completed cycles.
    pub cycles: u64,
    /// Batches that settled.
    pub batches: u64,
    /// Deleted-instance rows purged after their object was removed.
    pub purged: u64,
    /// Physical deletes that failed and were rescheduled.
    pub retried: u64,
}

impl DeletionStats {
    /// Fold one settled cycle into the totals.
    pub fn record_cycle(&mut self, batches: u64, purged: u64, retried: u64) {
        self.cycles += 1;
        self.batches += batches;
        self.purged += purged;
        self.retried += retried;
    }
}
