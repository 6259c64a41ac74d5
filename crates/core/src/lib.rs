//! Core domain types and shared logic for the DICOM instance index.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Instance identity, UIDs, and index status
//! - Watermarks and watermark ranges
//! - Deletion checkpoints and batching options
//! - Deletion job identity and state
//! - Retry policy and cleanup backoff
//! - Application configuration

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod instance;
pub mod job;
pub mod retry;
pub mod watermark;

pub use checkpoint::{BatchRequest, BatchingOptions, DeletionCheckpoint};
pub use error::{Error, Result};
pub use instance::{
    DEFAULT_PARTITION_KEY, DEFAULT_PARTITION_NAME, IndexStatus, IndexedDataset,
    InstanceIdentifier, ObjectLocation, SeriesAttributes, StudyAttributes,
    VersionedInstanceIdentifier, validate_uid,
};
pub use job::{DELETED_INSTANCE_CLEANUP, DeletionJobId, DeletionJobState, DeletionStats};
pub use retry::{RetryPolicy, cleanup_backoff};
pub use watermark::WatermarkRange;
