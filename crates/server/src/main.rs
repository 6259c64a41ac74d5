//! Deletion daemon binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use pacs_core::config::AppConfig;
use pacs_server::deletion::{resume_orphaned_jobs, spawn_auto_scheduler};
use pacs_server::state::WATCHDOG_INTERVAL;
use pacs_server::{AppState, JobRegistry, create_router};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// pacsd - purges soft-deleted DICOM instances in resumable batches
#[derive(Parser, Debug)]
#[command(name = "pacsd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "PACS_CONFIG", default_value = "config/pacsd.toml")]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `PACS_` env vars.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    let has_config_file = Path::new(path).exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("PACS_") && key != "PACS_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: pacsd --config /path/to/pacsd.toml\n  \
             2. Environment variables: PACS_ADMIN__TOKEN_HASH=<sha256 hex> \
             PACS_STORAGE__TYPE=filesystem PACS_STORAGE__PATH=/var/lib/pacs pacsd\n\n\
             See config/pacsd.example.toml for example configuration."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("PACS_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pacsd v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    pacs_server::metrics::register_metrics();

    let storage = pacs_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    let metadata = pacs_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize instance index")?;
    tracing::info!("Instance index initialized");

    let job_registry = Arc::new(JobRegistry::new(metadata.clone()));
    let state = AppState::new(config.clone(), storage, metadata, job_registry.clone());

    let _watchdog = job_registry.spawn_watchdog(WATCHDOG_INTERVAL, state.shutdown.clone());

    let resumed = resume_orphaned_jobs(&state)
        .await
        .context("failed to resume deletion jobs")?;
    if resumed > 0 {
        tracing::info!(count = resumed, "Resumed deletion jobs from previous run");
    }

    if config.deletion.auto_schedule_enabled {
        spawn_auto_scheduler(state.clone());
    } else {
        tracing::info!("Automatic deletion scheduling disabled");
    }

    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested, stopping deletion jobs");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
