//! Prometheus metrics for the deletion daemon.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no instance UIDs or patient data, only aggregate counts for
//! the purge backlog and job activity. The endpoint should still be
//! network-restricted to authorized scrapers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Orchestrator cycle metrics
pub static DELETION_CYCLES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pacs_deletion_cycles_total",
        "Total number of deletion cycles that advanced a checkpoint",
    )
    .expect("metric creation failed")
});

pub static DELETION_BATCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pacs_deletion_batches_total",
            "Total number of deletion batches by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static DELETED_INSTANCES_PURGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pacs_deleted_instances_purged_total",
        "Total number of deleted instances whose object was removed and row purged",
    )
    .expect("metric creation failed")
});

pub static DELETED_INSTANCE_RETRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pacs_deleted_instance_retries_total",
        "Total number of physical deletes that failed and were rescheduled",
    )
    .expect("metric creation failed")
});

// Job host metrics
pub static DELETION_JOBS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "pacs_deletion_jobs_active",
        "Number of deletion jobs currently running",
    )
    .expect("metric creation failed")
});

pub static DELETION_JOBS_PANICKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pacs_deletion_jobs_panicked_total",
        "Total number of deletion job tasks that panicked",
    )
    .expect("metric creation failed")
});

pub static DELETION_JOB_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "pacs_deletion_job_duration_seconds",
            "Deletion job activation duration in seconds by final state",
        )
        .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]),
        &["state"],
    )
    .expect("metric creation failed")
});

// Backlog gauges, refreshed by the stats endpoint and after each job
pub static DELETION_BACKLOG_OLDEST_AGE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "pacs_deletion_backlog_oldest_age_seconds",
        "Age in seconds of the oldest soft-deleted instance still awaiting purge",
    )
    .expect("metric creation failed")
});

pub static DELETION_EXHAUSTED_INSTANCES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "pacs_deletion_exhausted_instances",
        "Number of deleted instances that reached the maximum delete retries",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests and embedded routers may call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(DELETION_CYCLES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELETION_BATCHES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELETED_INSTANCES_PURGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELETED_INSTANCE_RETRIES.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(DELETION_JOBS_ACTIVE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELETION_JOBS_PANICKED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELETION_JOB_DURATION.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(DELETION_BACKLOG_OLDEST_AGE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELETION_EXHAUSTED_INSTANCES.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a settled batch by outcome (`ok` or `failed`).
pub fn record_batch(outcome: &str) {
    DELETION_BATCHES.with_label_values(&[outcome]).inc();
}
