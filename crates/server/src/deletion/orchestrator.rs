//! One cycle of the batched deletion workflow.
//!
//! A cycle fetches the next descending batches below the checkpoint, records
//! the job start time on the first productive cycle, processes the batches
//! with bounded parallelism, and only then derives the next checkpoint. Rows
//! deleted after the job started are never purged by it. The
//! caller persists that checkpoint and calls again; an empty fetch ends the
//! job.

use super::activities::{BatchStats, DeletionActivities};
use super::error::{DeletionError, DeletionResult};
use super::retry::with_retry;
use futures::stream::{self, StreamExt};
use pacs_core::{DeletionCheckpoint, DeletionJobId, RetryPolicy, WatermarkRange};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Result of a single cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing eligible below the checkpoint; the job is done.
    Terminate,
    /// Every batch settled; persist `checkpoint` before the next cycle.
    Resume {
        checkpoint: DeletionCheckpoint,
        batches: u64,
        stats: BatchStats,
    },
}

/// Drives deletion cycles against a set of activities.
pub struct DeletionOrchestrator {
    activities: Arc<dyn DeletionActivities>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl DeletionOrchestrator {
    pub fn new(
        activities: Arc<dyn DeletionActivities>,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            activities,
            retry,
            cancel,
        }
    }

    /// Run one cycle from `checkpoint`.
    ///
    /// Fails without producing a checkpoint when a batch is still failing
    /// after retries or the cycle was cancelled, so the same range is
    /// retried on the next activation.
    #[tracing::instrument(skip(self, checkpoint), fields(completed = ?checkpoint.completed))]
    pub async fn run_cycle(
        &self,
        job_id: DeletionJobId,
        checkpoint: &DeletionCheckpoint,
    ) -> DeletionResult<CycleOutcome> {
        let request = checkpoint.batch_request();
        let batches = with_retry(&self.retry, &self.cancel, "get_deletable_batches", || {
            self.activities.get_deletable_batches(&request)
        })
        .await?;

        if batches.is_empty() {
            tracing::info!(job_id = %job_id, "No deletable batches remain");
            return Ok(CycleOutcome::Terminate);
        }

        let created_time = match checkpoint.created_time {
            Some(created_time) => created_time,
            None => {
                with_retry(&self.retry, &self.cancel, "get_job_created_time", || {
                    self.activities.get_job_created_time(job_id)
                })
                .await?
            }
        };

        let stats = self
            .process_batches(&batches, checkpoint, created_time)
            .await?;

        // A cancel that lands after the join must still leave the checkpoint alone
        if self.cancel.is_cancelled() {
            return Err(DeletionError::Cancelled);
        }

        let next = checkpoint.advance(&batches, created_time).ok_or_else(|| {
            DeletionError::Checkpoint("cannot advance checkpoint past empty batches".to_string())
        })?;

        tracing::info!(
            job_id = %job_id,
            batches = batches.len(),
            purged = stats.purged,
            retried = stats.retried,
            completed = ?next.completed,
            "Deletion cycle settled"
        );

        Ok(CycleOutcome::Resume {
            checkpoint: next,
            batches: batches.len() as u64,
            stats,
        })
    }

    /// Delete every batch, at most `max_parallel_count` at a time.
    ///
    /// Waits for all batches before reporting, so a failing batch never
    /// abandons its siblings mid-flight.
    async fn process_batches(
        &self,
        batches: &[WatermarkRange],
        checkpoint: &DeletionCheckpoint,
        deleted_until: OffsetDateTime,
    ) -> DeletionResult<BatchStats> {
        let parallelism = (checkpoint.batching.max_parallel_count as usize).max(1);

        let results: Vec<(WatermarkRange, DeletionResult<BatchStats>)> =
            stream::iter(batches.iter().copied())
                .map(|range| {
                    let activities = self.activities.clone();
                    let cancel = self.cancel.clone();
                    let retry = self.retry;
                    async move {
                        let result = with_retry(&retry, &cancel, "delete_batch", || {
                            activities.delete_batch(range, deleted_until)
                        })
                        .await;
                        (range, result)
                    }
                })
                .buffer_unordered(parallelism)
                .collect()
                .await;

        let mut total = BatchStats::default();
        let mut first_error = None;

        for (range, result) in results {
            match result {
                Ok(stats) => {
                    crate::metrics::record_batch("ok");
                    total.purged += stats.purged;
                    total.retried += stats.retried;
                }
                Err(e) => {
                    crate::metrics::record_batch("failed");
                    if !e.is_cancelled() {
                        tracing::error!(range = %range, error = %e, "Deletion batch failed");
                    }
                    // Cancellation wins so the host treats the cycle as interrupted
                    if first_error.is_none() || e.is_cancelled() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}
