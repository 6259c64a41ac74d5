//! Batched purge of soft-deleted instances.
//!
//! The orchestrator walks the deleted-instance backlog from the highest
//! watermark downward in bounded cycles. Each cycle's boundary is persisted
//! as a [`pacs_core::DeletionCheckpoint`] on the job row, which is what lets
//! a job resume after a restart without revisiting purged watermarks.

pub mod activities;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod retry;

pub use activities::{BatchStats, DeletionActivities, IndexDeletionActivities};
pub use error::{DeletionError, DeletionResult};
pub use job::{
    Activation, BacklogStats, backlog_stats, resume_orphaned_jobs, run_deletion_job,
    spawn_auto_scheduler, spawn_deletion_job, trigger_deletion_job,
};
pub use orchestrator::{CycleOutcome, DeletionOrchestrator};
pub use retry::with_retry;
