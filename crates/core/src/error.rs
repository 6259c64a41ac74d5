//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid watermark range: start {start} > end {end}")]
    InvalidWatermarkRange { start: i64, end: i64 },

    #[error("invalid UID: {0}")]
    InvalidUid(String),

    #[error("invalid index status: {0}")]
    InvalidIndexStatus(i32),

    #[error("invalid batching options: {0}")]
    InvalidBatching(String),

    #[error("invalid deletion job: {0}")]
    InvalidJob(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
