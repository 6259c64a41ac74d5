//! Server test utilities.

use pacs_core::config::{AppConfig, DeletionConfig, MetadataConfig, StorageConfig};
use pacs_metadata::{MetadataStore, SqliteStore};
use pacs_server::{AppState, JobRegistry, create_router};
use pacs_storage::{FilesystemBackend, InstanceFileStore, ObjectStore};
use std::sync::Arc;
use tempfile::TempDir;

/// Raw admin token whose hash `AdminConfig::for_testing` carries.
#[allow(dead_code)]
pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server over a temp filesystem store and SQLite index.
    pub async fn new() -> Self {
        Self::with_deletion_config(AppConfig::for_testing().deletion).await
    }

    /// Create a test server whose deletion jobs run with `deletion`.
    pub async fn with_deletion_config(deletion: DeletionConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("objects");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );
        let storage_config = StorageConfig::Filesystem { path: storage_path };
        Self::build(temp_dir, storage, storage_config, deletion).await
    }

    async fn build(
        temp_dir: TempDir,
        storage: Arc<dyn ObjectStore>,
        storage_config: StorageConfig,
        deletion: DeletionConfig,
    ) -> Self {
        let db_path = temp_dir.path().join("index.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let config = AppConfig {
            storage: storage_config,
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
            deletion,
            ..AppConfig::for_testing()
        };

        pacs_server::metrics::register_metrics();

        let job_registry = Arc::new(JobRegistry::new(metadata.clone()));
        let state = AppState::new(config, storage, metadata, job_registry);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    pub fn files(&self) -> InstanceFileStore {
        self.state.files()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Stop background jobs before the temp directory goes away
        self.state.shutdown.cancel();
    }
}
