//! Deletion orchestrator error types.

use pacs_metadata::MetadataError;
use pacs_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while running deletion cycles.
#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<DeletionError>,
    },

    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl DeletionError {
    /// Whether the retry policy should try the call again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Metadata(e) => e.is_transient(),
            Self::Storage(e) => e.is_transient(),
            Self::Timeout { .. } => true,
            Self::Cancelled | Self::RetriesExhausted { .. } | Self::Checkpoint(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<pacs_core::Error> for DeletionError {
    fn from(e: pacs_core::Error) -> Self {
        Self::Checkpoint(e.to_string())
    }
}

/// Result type for deletion operations.
pub type DeletionResult<T> = std::result::Result<T, DeletionError>;
