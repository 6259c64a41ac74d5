//! Application state shared across handlers and background jobs.

use pacs_core::DeletionJobState;
use pacs_core::config::AppConfig;
use pacs_metadata::MetadataStore;
use pacs_metadata::repos::DeletionJobRepo;
use pacs_storage::{InstanceFileStore, ObjectStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How often the watchdog inspects tracked job tasks.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Registry of spawned deletion job tasks.
///
/// A job task that panics never reaches its own state update, leaving the
/// row `running` and blocking new jobs through the active-job index. The
/// watchdog reaps finished handles and marks panicked jobs `failed`.
pub struct JobRegistry {
    tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
    metadata: Arc<dyn MetadataStore>,
}

impl JobRegistry {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            metadata,
        }
    }

    /// Track a spawned job task.
    pub async fn register(&self, job_id: Uuid, handle: JoinHandle<()>) {
        self.tasks.lock().await.insert(job_id, handle);
    }

    /// Whether a task for `job_id` is still tracked in this process.
    pub async fn is_tracked(&self, job_id: Uuid) -> bool {
        self.tasks.lock().await.contains_key(&job_id)
    }

    /// Spawn the watchdog loop. It stops when `shutdown` fires.
    pub fn spawn_watchdog(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => self.check_tasks().await,
                }
            }
            tracing::debug!("Job watchdog stopped");
        })
    }

    /// Reap finished tasks and fail the jobs of any that panicked.
    pub async fn check_tasks(&self) {
        // Collect under the lock, await outside it
        let finished: Vec<(Uuid, JoinHandle<()>)> = {
            let mut tasks = self.tasks.lock().await;
            let done: Vec<Uuid> = tasks
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(job_id, _)| *job_id)
                .collect();
            done.into_iter()
                .filter_map(|job_id| tasks.remove(&job_id).map(|h| (job_id, h)))
                .collect()
        };

        for (job_id, handle) in finished {
            match handle.await {
                Ok(()) => {
                    tracing::debug!(job_id = %job_id, "Deletion job task completed");
                }
                Err(join_err) if join_err.is_panic() => {
                    crate::metrics::DELETION_JOBS_ACTIVE.dec();
                    crate::metrics::DELETION_JOBS_PANICKED.inc();
                    tracing::error!(
                        job_id = %job_id,
                        panic = ?join_err,
                        "Deletion job task panicked, marking job as failed"
                    );

                    if let Err(e) = self
                        .metadata
                        .update_deletion_job_state(
                            job_id,
                            DeletionJobState::Failed.as_str(),
                            Some(time::OffsetDateTime::now_utc()),
                        )
                        .await
                    {
                        tracing::error!(
                            job_id = %job_id,
                            error = %e,
                            "Failed to mark panicked job as failed"
                        );
                    }
                }
                Err(join_err) => {
                    crate::metrics::DELETION_JOBS_ACTIVE.dec();
                    tracing::warn!(job_id = %job_id, error = ?join_err, "Deletion job task was cancelled");
                }
            }
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Instance index.
    pub metadata: Arc<dyn MetadataStore>,
    /// Spawned deletion job tasks.
    pub job_registry: Arc<JobRegistry>,
    /// Fired on shutdown; running cycles abort without advancing.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        job_registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            job_registry,
            shutdown: CancellationToken::new(),
        }
    }

    /// Watermark-addressed view of the object store.
    pub fn files(&self) -> InstanceFileStore {
        InstanceFileStore::new(self.storage.clone())
    }
}
