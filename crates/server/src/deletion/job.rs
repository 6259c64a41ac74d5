//! Hosting deletion jobs: activation, persistence, scheduling, recovery.

use super::activities::{DeletionActivities, IndexDeletionActivities};
use super::error::{DeletionError, DeletionResult};
use super::orchestrator::{CycleOutcome, DeletionOrchestrator};
use super::retry::with_retry;
use crate::state::AppState;
use pacs_core::config::DeletionConfig;
use pacs_core::{
    DELETED_INSTANCE_CLEANUP, DeletionCheckpoint, DeletionJobId, DeletionJobState, DeletionStats,
};
use pacs_metadata::models::DeletionJobRow;
use pacs_metadata::repos::{DeletedInstanceRepo, DeletionJobRepo};
use pacs_metadata::{MetadataError, MetadataResult, MetadataStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How one activation of a job ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    /// Nothing eligible remains below the checkpoint.
    Drained(DeletionStats),
    /// Stopped at `max_cycles_per_activation` with progress saved; the job
    /// is still active and needs another activation.
    Paused(DeletionStats),
}

impl Activation {
    /// Totals accumulated over the job's lifetime so far.
    pub fn stats(&self) -> &DeletionStats {
        match self {
            Activation::Drained(stats) | Activation::Paused(stats) => stats,
        }
    }

    pub fn is_drained(&self) -> bool {
        matches!(self, Activation::Drained(_))
    }
}

/// Run one activation of a job until the backlog is drained, a cycle fails,
/// the cycle limit is reached, or `cancel` fires.
///
/// Progress is loaded from and written back to the job row after every
/// cycle, so a later activation continues where this one stopped.
pub async fn run_deletion_job(
    job_id: DeletionJobId,
    metadata: Arc<dyn MetadataStore>,
    activities: Arc<dyn DeletionActivities>,
    config: &DeletionConfig,
    cancel: CancellationToken,
) -> DeletionResult<Activation> {
    let retry = config.retry_policy();
    let uuid = *job_id.as_uuid();

    let row = with_retry(&retry, &cancel, "get_deletion_job", || async {
        Ok(metadata.get_deletion_job(uuid).await?)
    })
    .await?
    .ok_or_else(|| MetadataError::NotFound(format!("deletion job {job_id}")))?;

    let mut checkpoint = match row.checkpoint_json.as_deref() {
        Some(json) => {
            let checkpoint = DeletionCheckpoint::from_json(json)?;
            tracing::info!(
                job_id = %job_id,
                completed = ?checkpoint.completed,
                "Resuming deletion job from checkpoint"
            );
            checkpoint
        }
        None => DeletionCheckpoint::new(config.batching()),
    };
    let mut stats: DeletionStats = match row.stats_json.as_deref() {
        Some(json) => serde_json::from_str(json)
            .map_err(|e| DeletionError::Checkpoint(format!("invalid job stats: {e}")))?,
        None => DeletionStats::default(),
    };

    with_retry(&retry, &cancel, "mark_job_running", || async {
        Ok(metadata
            .update_deletion_job_state(uuid, DeletionJobState::Running.as_str(), None)
            .await?)
    })
    .await?;

    let orchestrator = DeletionOrchestrator::new(activities, retry, cancel.clone());

    for _ in 0..config.max_cycles_per_activation {
        let (next, batches, batch_stats) = match orchestrator.run_cycle(job_id, &checkpoint).await?
        {
            CycleOutcome::Terminate => return Ok(Activation::Drained(stats)),
            CycleOutcome::Resume {
                checkpoint,
                batches,
                stats,
            } => (checkpoint, batches, stats),
        };

        stats.record_cycle(batches, batch_stats.purged, batch_stats.retried);
        let checkpoint_json = next.to_json()?;
        let stats_json = serde_json::to_string(&stats)
            .map_err(|e| DeletionError::Checkpoint(format!("failed to serialize stats: {e}")))?;

        with_retry(&retry, &cancel, "save_deletion_checkpoint", || async {
            Ok(metadata
                .save_deletion_checkpoint(uuid, &checkpoint_json, Some(&stats_json))
                .await?)
        })
        .await?;

        crate::metrics::DELETION_CYCLES.inc();
        crate::metrics::DELETED_INSTANCES_PURGED.inc_by(batch_stats.purged);
        crate::metrics::DELETED_INSTANCE_RETRIES.inc_by(batch_stats.retried);
        checkpoint = next;
    }

    tracing::warn!(
        job_id = %job_id,
        max_cycles = config.max_cycles_per_activation,
        completed = ?checkpoint.completed,
        "Deletion job hit the cycle limit for one activation, pausing"
    );
    Ok(Activation::Paused(stats))
}

/// Record a new cleanup job and start it.
///
/// Fails with `MetadataError::Constraint` while another cleanup job is
/// queued or running.
pub async fn trigger_deletion_job(state: &AppState) -> MetadataResult<DeletionJobId> {
    let job_id = DeletionJobId::new();
    let now = OffsetDateTime::now_utc();

    let row = DeletionJobRow {
        job_id: *job_id.as_uuid(),
        job_type: DELETED_INSTANCE_CLEANUP.to_string(),
        state: DeletionJobState::Queued.as_str().to_string(),
        created_at: now,
        updated_at: now,
        finished_at: None,
        checkpoint_json: None,
        stats_json: None,
    };
    state.metadata.create_deletion_job(&row).await?;
    tracing::info!(job_id = %job_id, "Deletion job created");

    spawn_deletion_job(state, job_id).await;
    Ok(job_id)
}

/// Run `job_id` on a background task tracked by the job registry.
pub async fn spawn_deletion_job(state: &AppState, job_id: DeletionJobId) {
    crate::metrics::DELETION_JOBS_ACTIVE.inc();

    let metadata = state.metadata.clone();
    let config = state.config.clone();
    let activities: Arc<dyn DeletionActivities> = Arc::new(IndexDeletionActivities::new(
        metadata.clone(),
        state.files(),
        config.deletion.cleanup_retry_backoff(),
    ));
    let cancel = state.shutdown.child_token();
    let uuid = *job_id.as_uuid();

    let handle = tokio::spawn(async move {
        let started = Instant::now();

        // Re-activate from the saved checkpoint until the backlog drains
        let result = loop {
            match run_deletion_job(
                job_id,
                metadata.clone(),
                activities.clone(),
                &config.deletion,
                cancel.clone(),
            )
            .await
            {
                Ok(Activation::Paused(stats)) => {
                    tracing::debug!(
                        job_id = %job_id,
                        cycles = stats.cycles,
                        "Reactivating deletion job"
                    );
                    tokio::task::yield_now().await;
                }
                other => break other.map(|activation| *activation.stats()),
            }
        };

        let final_state = match &result {
            Ok(stats) => {
                tracing::info!(
                    job_id = %job_id,
                    cycles = stats.cycles,
                    purged = stats.purged,
                    retried = stats.retried,
                    "Deletion job finished"
                );
                Some(DeletionJobState::Finished)
            }
            Err(e) if e.is_cancelled() => {
                // Left active so the next start resumes from the saved checkpoint
                tracing::info!(job_id = %job_id, "Deletion job interrupted by shutdown");
                None
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Deletion job failed");
                Some(DeletionJobState::Failed)
            }
        };

        crate::metrics::DELETION_JOBS_ACTIVE.dec();

        if let Some(final_state) = final_state {
            crate::metrics::DELETION_JOB_DURATION
                .with_label_values(&[final_state.as_str()])
                .observe(started.elapsed().as_secs_f64());

            if let Err(e) = metadata
                .update_deletion_job_state(
                    uuid,
                    final_state.as_str(),
                    Some(OffsetDateTime::now_utc()),
                )
                .await
            {
                tracing::error!(job_id = %job_id, error = %e, "Failed to update deletion job state");
            }

            if let Err(e) =
                backlog_stats(metadata.as_ref(), config.deletion.max_delete_retries).await
            {
                tracing::warn!(error = %e, "Failed to refresh backlog gauges");
            }
        }
    });

    state.job_registry.register(uuid, handle).await;
}

/// Resume jobs a previous process left queued or running.
///
/// Returns how many were restarted.
pub async fn resume_orphaned_jobs(state: &AppState) -> MetadataResult<usize> {
    let jobs = state.metadata.get_active_deletion_jobs().await?;
    let mut resumed = 0;

    for job in jobs {
        if state.job_registry.is_tracked(job.job_id).await {
            continue;
        }
        tracing::warn!(
            job_id = %job.job_id,
            job_state = %job.state,
            has_checkpoint = job.checkpoint_json.is_some(),
            "Resuming deletion job left by a previous process"
        );
        spawn_deletion_job(state, DeletionJobId::from_uuid(job.job_id)).await;
        resumed += 1;
    }

    Ok(resumed)
}

/// Trigger a cleanup job every `deletion.auto_schedule_interval_secs`.
pub fn spawn_auto_scheduler(state: AppState) -> JoinHandle<()> {
    let interval = state.config.deletion.auto_schedule_interval();

    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Automatic deletion scheduler enabled"
        );

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            match trigger_deletion_job(&state).await {
                Ok(job_id) => {
                    tracing::info!(job_id = %job_id, "Automatic deletion job started");
                }
                Err(MetadataError::Constraint(_)) => {
                    tracing::debug!("Deletion job already active, skipping scheduled run");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start automatic deletion job");
                }
            }
        }
    })
}

/// Snapshot of the purge backlog.
#[derive(Clone, Debug, Serialize)]
pub struct BacklogStats {
    #[serde(with = "time::serde::rfc3339")]
    pub oldest_deleted: OffsetDateTime,
    pub backlog_age_seconds: i64,
    pub exhausted_instances: i64,
    pub max_delete_retries: i32,
}

/// Read backlog health and refresh the matching gauges.
pub async fn backlog_stats(
    metadata: &dyn MetadataStore,
    max_delete_retries: i32,
) -> MetadataResult<BacklogStats> {
    let oldest_deleted = metadata.get_oldest_deleted().await?;
    let exhausted_instances = metadata
        .retrieve_num_exhausted_deleted_instance_attempts(max_delete_retries)
        .await?;
    let backlog_age_seconds = (OffsetDateTime::now_utc() - oldest_deleted)
        .whole_seconds()
        .max(0);

    crate::metrics::DELETION_BACKLOG_OLDEST_AGE.set(backlog_age_seconds);
    crate::metrics::DELETION_EXHAUSTED_INSTANCES.set(exhausted_instances);

    Ok(BacklogStats {
        oldest_deleted,
        backlog_age_seconds,
        exhausted_instances,
        max_delete_retries,
    })
}
