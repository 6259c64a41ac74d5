//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// A create for this identity is already in flight.
    #[error("pending instance creation: {0}")]
    PendingInstanceCreation(String),

    #[error("instance already exists: {0}")]
    InstanceAlreadyExists(String),

    /// Indexable tags were added after the caller sampled the tag version.
    #[error("extended query tags out of date: supplied {supplied}, current {current}")]
    ExtendedQueryTagsOutOfDate { supplied: i32, current: i32 },

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    #[error("series not found: {0}")]
    SeriesNotFound(String),

    #[error("study not found: {0}")]
    StudyNotFound(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(#[from] pacs_core::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    /// Whether retrying the same call may succeed.
    ///
    /// Only infrastructure failures qualify; conflicts and missing targets
    /// are answers, not outages.
    pub fn is_transient(&self) -> bool {
        match self {
            MetadataError::Database(err) => match err {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message();
                    msg.contains("database is locked") || msg.contains("database is busy")
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
