//! Scripted deletion activities for orchestrator tests.

use async_trait::async_trait;
use pacs_core::{BatchRequest, DeletionJobId, WatermarkRange};
use pacs_server::deletion::{BatchStats, DeletionActivities, DeletionError, DeletionResult};
use pacs_storage::StorageError;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use time::macros::datetime;

/// Job start time reported by [`RecordingActivities`].
#[allow(dead_code)]
pub const JOB_CREATED_AT: OffsetDateTime = datetime!(2024-03-01 08:00 UTC);

/// In-memory backlog that records every call made against it.
///
/// Watermarks leave the backlog when a batch covering them succeeds.
#[allow(dead_code)]
pub struct RecordingActivities {
    backlog: Mutex<BTreeSet<i64>>,
    /// Batch starts that fail permanently.
    broken: Mutex<HashSet<i64>>,
    /// Batch starts that fail with a transient error this many more times.
    flaky: Mutex<HashMap<i64, usize>>,
    requests: Mutex<Vec<BatchRequest>>,
    deleted: Mutex<Vec<WatermarkRange>>,
    /// `deleted_until` bound of every delete call.
    delete_bounds: Mutex<Vec<OffsetDateTime>>,
    batch_delay: Mutex<Option<Duration>>,
    pub fetch_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub created_time_calls: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingActivities {
    pub fn new(watermarks: impl IntoIterator<Item = i64>) -> Self {
        Self {
            backlog: Mutex::new(watermarks.into_iter().collect()),
            broken: Mutex::new(HashSet::new()),
            flaky: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            delete_bounds: Mutex::new(Vec::new()),
            batch_delay: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            created_time_calls: AtomicUsize::new(0),
        }
    }

    /// Backlog of watermarks `1..=count`.
    pub fn with_backlog(count: i64) -> Self {
        Self::new(1..=count)
    }

    /// Fail every attempt at the batch starting at `start`.
    pub fn break_batch(&self, start: i64) {
        self.broken.lock().unwrap().insert(start);
    }

    /// Fail the batch starting at `start` transiently `times` times.
    pub fn flake_batch(&self, start: i64, times: usize) {
        self.flaky.lock().unwrap().insert(start, times);
    }

    /// Make every batch delete take `delay`.
    pub fn slow_batches(&self, delay: Duration) {
        *self.batch_delay.lock().unwrap() = Some(delay);
    }

    pub fn remaining(&self) -> Vec<i64> {
        self.backlog.lock().unwrap().iter().copied().collect()
    }

    pub fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Successfully deleted ranges, highest first.
    pub fn deleted(&self) -> Vec<WatermarkRange> {
        let mut deleted = self.deleted.lock().unwrap().clone();
        deleted.sort_by_key(|r| std::cmp::Reverse(r.end()));
        deleted
    }

    pub fn delete_bounds(&self) -> Vec<OffsetDateTime> {
        self.delete_bounds.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn created_time_lookups(&self) -> usize {
        self.created_time_calls.load(Ordering::SeqCst)
    }

    fn injected_failure(&self, start: i64) -> Option<DeletionError> {
        if self.broken.lock().unwrap().contains(&start) {
            return Some(DeletionError::Checkpoint(format!(
                "injected permanent failure at {start}"
            )));
        }
        let mut flaky = self.flaky.lock().unwrap();
        match flaky.get_mut(&start) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Some(DeletionError::Storage(StorageError::Unavailable(format!(
                    "injected transient failure at {start}"
                ))))
            }
            _ => None,
        }
    }
}

#[async_trait]
impl DeletionActivities for RecordingActivities {
    async fn get_deletable_batches(
        &self,
        request: &BatchRequest,
    ) -> DeletionResult<Vec<WatermarkRange>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(*request);

        let limit = (request.batch_size * request.max_parallel_batches) as usize;
        let watermarks: Vec<i64> = self
            .backlog
            .lock()
            .unwrap()
            .iter()
            .rev()
            .copied()
            .filter(|w| request.max_watermark.is_none_or(|max| *w <= max))
            .take(limit)
            .collect();

        Ok(WatermarkRange::partition_descending(
            &watermarks,
            request.batch_size as usize,
        ))
    }

    async fn delete_batch(
        &self,
        range: WatermarkRange,
        deleted_until: OffsetDateTime,
    ) -> DeletionResult<BatchStats> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.delete_bounds.lock().unwrap().push(deleted_until);

        let delay = *self.batch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.injected_failure(range.start()) {
            return Err(err);
        }

        let mut backlog = self.backlog.lock().unwrap();
        let before = backlog.len();
        backlog.retain(|w| !range.contains(*w));
        let purged = (before - backlog.len()) as u64;
        drop(backlog);

        self.deleted.lock().unwrap().push(range);
        Ok(BatchStats { purged, retried: 0 })
    }

    async fn get_job_created_time(
        &self,
        _job_id: DeletionJobId,
    ) -> DeletionResult<OffsetDateTime> {
        self.created_time_calls.fetch_add(1, Ordering::SeqCst);
        Ok(JOB_CREATED_AT)
    }
}
