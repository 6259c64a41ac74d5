//! Configuration types shared across crates.

use crate::checkpoint::BatchingOptions;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the admin API (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// The endpoint is unauthenticated; restrict it at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

/// Admin token configuration.
///
/// Admin endpoints require `Authorization: Bearer <token>` where the SHA-256
/// hex digest of the token equals `token_hash`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// Create a test configuration.
    ///
    /// **For testing only.** The hash is SHA-256 of "test-admin-token".
    pub fn for_testing() -> Self {
        Self {
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
        }
    }

    /// Validate the token hash format.
    pub fn validate(&self) -> Result<(), String> {
        let hash = self.token_hash.strip_prefix("sha256:").unwrap_or(&self.token_hash);
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err("admin.token_hash must be 64 hex characters".to_string());
        }
        Ok(())
    }

    /// Normalized lowercase hex digest.
    pub fn normalized_hash(&self) -> String {
        self.token_hash
            .strip_prefix("sha256:")
            .unwrap_or(&self.token_hash)
            .to_ascii_lowercase()
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// Process-local storage, lost on exit. Intended for tests and demos.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("filesystem storage requires a non-empty path".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600) // 10 minutes (advisory only)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/index.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { path, .. } if path.as_os_str().is_empty() => {
                Err("sqlite metadata requires a non-empty path".to_string())
            }
            MetadataConfig::Sqlite { .. } => Ok(()),
        }
    }
}

/// Batched deletion configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Maximum watermarks per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Maximum batches deleted concurrently per cycle.
    #[serde(default = "default_max_parallel_count")]
    pub max_parallel_count: u32,
    /// Attempts per remote call, including the first.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    /// Multiplier applied to the retry delay after each failure.
    #[serde(default = "default_retry_backoff_coefficient")]
    pub retry_backoff_coefficient: f64,
    /// Upper bound on a single retry delay in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Timeout for a single remote call attempt in seconds.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Failed physical deletes after which an instance counts as exhausted.
    #[serde(default = "default_max_delete_retries")]
    pub max_delete_retries: i32,
    /// Base delay in seconds before a failed delete becomes eligible again.
    /// Doubles with every further failure, capped at one day.
    #[serde(default = "default_cleanup_retry_backoff_secs")]
    pub cleanup_retry_backoff_secs: u64,
    /// Run deletion jobs on a schedule (disabled by default).
    #[serde(default)]
    pub auto_schedule_enabled: bool,
    /// Interval in seconds between scheduled jobs (default: 1 hour).
    #[serde(default = "default_auto_schedule_interval_secs")]
    pub auto_schedule_interval_secs: u64,
    /// Cycles a single job activation may run before yielding.
    #[serde(default = "default_max_cycles_per_activation")]
    pub max_cycles_per_activation: u64,
}

fn default_batch_size() -> u32 {
    100
}

fn default_max_parallel_count() -> u32 {
    4
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_initial_delay_ms() -> u64 {
    1000
}

fn default_retry_backoff_coefficient() -> f64 {
    2.0
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_call_timeout_secs() -> u64 {
    300 // 5 minutes per call
}

fn default_max_delete_retries() -> i32 {
    5
}

fn default_cleanup_retry_backoff_secs() -> u64 {
    90
}

fn default_auto_schedule_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_max_cycles_per_activation() -> u64 {
    10_000
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_parallel_count: default_max_parallel_count(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_backoff_coefficient: default_retry_backoff_coefficient(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            max_delete_retries: default_max_delete_retries(),
            cleanup_retry_backoff_secs: default_cleanup_retry_backoff_secs(),
            auto_schedule_enabled: false,
            auto_schedule_interval_secs: default_auto_schedule_interval_secs(),
            max_cycles_per_activation: default_max_cycles_per_activation(),
        }
    }
}

impl DeletionConfig {
    /// Batch sizing for new jobs.
    pub fn batching(&self) -> BatchingOptions {
        BatchingOptions {
            size: self.batch_size,
            max_parallel_count: self.max_parallel_count,
        }
    }

    /// Retry policy wrapped around every remote call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_delay: std::time::Duration::from_millis(self.retry_initial_delay_ms),
            backoff_coefficient: self.retry_backoff_coefficient,
            max_delay: std::time::Duration::from_millis(self.retry_max_delay_ms),
            attempt_timeout: std::time::Duration::from_secs(self.call_timeout_secs),
        }
    }

    /// Base backoff for failed physical deletes.
    pub fn cleanup_retry_backoff(&self) -> time::Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.cleanup_retry_backoff_secs).unwrap_or(i64::MAX);
        time::Duration::seconds(secs)
    }

    /// Get the auto schedule interval as a std::time::Duration.
    pub fn auto_schedule_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.auto_schedule_interval_secs)
    }

    /// Validate deletion configuration for dangerous settings.
    pub fn validate(&self) -> Result<(), String> {
        self.batching()
            .validate()
            .map_err(|e| format!("deletion: {e}"))?;

        if self.retry_max_attempts == 0 {
            return Err("deletion.retry_max_attempts must be at least 1".to_string());
        }

        if !(self.retry_backoff_coefficient >= 1.0) {
            return Err(format!(
                "deletion.retry_backoff_coefficient {} must be >= 1.0",
                self.retry_backoff_coefficient
            ));
        }

        if self.call_timeout_secs == 0 {
            return Err("deletion.call_timeout_secs must be greater than zero".to_string());
        }

        if self.max_delete_retries < 0 {
            return Err("deletion.max_delete_retries must not be negative".to_string());
        }

        if self.cleanup_retry_backoff_secs > i64::MAX as u64 {
            return Err(format!(
                "deletion.cleanup_retry_backoff_secs {} exceeds maximum value {}",
                self.cleanup_retry_backoff_secs,
                i64::MAX
            ));
        }

        if self.auto_schedule_enabled && self.auto_schedule_interval_secs == 0 {
            return Err(
                "deletion.auto_schedule_interval_secs must be greater than zero".to_string(),
            );
        }

        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Admin token configuration (required).
    pub admin: AdminConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Deletion job configuration.
    #[serde(default)]
    pub deletion: DeletionConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses in-memory storage and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            admin: AdminConfig::for_testing(),
            storage: StorageConfig::Memory,
            metadata: MetadataConfig::default(),
            deletion: DeletionConfig {
                retry_initial_delay_ms: 1,
                retry_max_delay_ms: 10,
                ..DeletionConfig::default()
            },
        }
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.admin.validate()?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.deletion.validate()
    }
}
