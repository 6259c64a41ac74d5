//! Deletion cycle behavior against scripted activities.

mod common;

use common::{JOB_CREATED_AT, RecordingActivities};
use pacs_core::{BatchingOptions, DeletionCheckpoint, DeletionJobId, RetryPolicy, WatermarkRange};
use pacs_server::deletion::{CycleOutcome, DeletionError, DeletionOrchestrator};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        backoff_coefficient: 2.0,
        max_delay: Duration::from_millis(5),
        attempt_timeout: Duration::from_secs(5),
    }
}

fn orchestrator(activities: &Arc<RecordingActivities>) -> DeletionOrchestrator {
    DeletionOrchestrator::new(activities.clone(), fast_retry(3), CancellationToken::new())
}

fn checkpoint(size: u32, parallel: u32) -> DeletionCheckpoint {
    DeletionCheckpoint::new(BatchingOptions::new(size, parallel).unwrap())
}

fn range(start: i64, end: i64) -> WatermarkRange {
    WatermarkRange::new(start, end).unwrap()
}

#[tokio::test]
async fn test_first_cycle_covers_top_of_backlog() {
    let activities = Arc::new(RecordingActivities::with_backlog(50));
    let job_id = DeletionJobId::new();

    let outcome = orchestrator(&activities)
        .run_cycle(job_id, &checkpoint(10, 5))
        .await
        .unwrap();

    let CycleOutcome::Resume {
        checkpoint,
        batches,
        stats,
    } = outcome
    else {
        panic!("expected the cycle to resume");
    };
    assert_eq!(batches, 5);
    assert_eq!(stats.purged, 50);
    assert_eq!(checkpoint.completed, Some(range(1, 50)));
    assert_eq!(checkpoint.created_time, Some(JOB_CREATED_AT));

    assert_eq!(
        activities.deleted(),
        vec![
            range(41, 50),
            range(31, 40),
            range(21, 30),
            range(11, 20),
            range(1, 10)
        ]
    );
    assert_eq!(activities.created_time_lookups(), 1);
    assert_eq!(activities.requests()[0].max_watermark, None);
    assert!(activities.remaining().is_empty());

    // Every purge is bounded by the job start time once it is known
    assert_eq!(activities.delete_bounds(), vec![JOB_CREATED_AT; 5]);
}

#[tokio::test]
async fn test_resumed_cycle_stays_below_completed_range() {
    let activities = Arc::new(RecordingActivities::with_backlog(42));
    let created = OffsetDateTime::now_utc();
    let resumed = DeletionCheckpoint {
        completed: Some(range(36, 42)),
        created_time: Some(created),
        ..checkpoint(10, 2)
    };

    let outcome = orchestrator(&activities)
        .run_cycle(DeletionJobId::new(), &resumed)
        .await
        .unwrap();

    assert_eq!(activities.requests()[0].max_watermark, Some(35));
    assert_eq!(activities.requests()[0].deleted_until, Some(created));
    assert_eq!(activities.created_time_lookups(), 0);
    assert_eq!(activities.delete_bounds(), vec![created; 2]);
    assert_eq!(activities.deleted(), vec![range(26, 35), range(16, 25)]);

    let CycleOutcome::Resume { checkpoint, .. } = outcome else {
        panic!("expected the cycle to resume");
    };
    assert_eq!(checkpoint.completed, Some(range(16, 42)));
    assert_eq!(checkpoint.created_time, Some(created));

    // Watermarks above the boundary are never revisited
    assert_eq!(
        activities.remaining(),
        (1..=15).chain(36..=42).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_empty_backlog_terminates_without_lookups() {
    let activities = Arc::new(RecordingActivities::with_backlog(0));

    let outcome = orchestrator(&activities)
        .run_cycle(DeletionJobId::new(), &checkpoint(10, 5))
        .await
        .unwrap();

    assert_eq!(outcome, CycleOutcome::Terminate);
    assert_eq!(activities.fetches(), 1);
    assert_eq!(activities.deletes(), 0);
    assert_eq!(activities.created_time_lookups(), 0);
}

#[tokio::test]
async fn test_exhausted_backlog_terminates_after_last_cycle() {
    let activities = Arc::new(RecordingActivities::with_backlog(25));
    let orchestrator = orchestrator(&activities);
    let job_id = DeletionJobId::new();

    let mut current = checkpoint(10, 2);
    let mut cycles = 0;
    loop {
        match orchestrator.run_cycle(job_id, &current).await.unwrap() {
            CycleOutcome::Terminate => break,
            CycleOutcome::Resume { checkpoint, .. } => {
                current = checkpoint;
                cycles += 1;
            }
        }
        assert!(cycles < 10, "orchestrator did not terminate");
    }

    assert_eq!(cycles, 2);
    assert_eq!(current.completed, Some(range(1, 25)));
    assert_eq!(activities.created_time_lookups(), 1);
    assert!(activities.remaining().is_empty());
}

#[tokio::test]
async fn test_failed_batch_blocks_checkpoint_but_siblings_finish() {
    let activities = Arc::new(RecordingActivities::with_backlog(30));
    activities.break_batch(11);

    let err = orchestrator(&activities)
        .run_cycle(DeletionJobId::new(), &checkpoint(10, 3))
        .await
        .unwrap_err();
    assert!(matches!(err, DeletionError::Checkpoint(_)));

    // Sibling batches still ran to completion
    assert_eq!(activities.deleted(), vec![range(21, 30), range(1, 10)]);
    assert_eq!(activities.remaining(), (11..=20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_transient_batch_failure_is_retried() {
    let activities = Arc::new(RecordingActivities::with_backlog(20));
    activities.flake_batch(1, 2);

    let outcome = orchestrator(&activities)
        .run_cycle(DeletionJobId::new(), &checkpoint(10, 2))
        .await
        .unwrap();

    assert!(matches!(outcome, CycleOutcome::Resume { .. }));
    // Two failed attempts plus one success for the flaky batch
    assert_eq!(activities.deletes(), 4);
    assert!(activities.remaining().is_empty());
}

#[tokio::test]
async fn test_transient_failure_exhausts_retries() {
    let activities = Arc::new(RecordingActivities::with_backlog(10));
    activities.flake_batch(1, 10);

    let err = orchestrator(&activities)
        .run_cycle(DeletionJobId::new(), &checkpoint(10, 1))
        .await
        .unwrap_err();

    match err {
        DeletionError::RetriesExhausted {
            operation,
            attempts,
            ..
        } => {
            assert_eq!(operation, "delete_batch");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(activities.remaining().len(), 10);
}

#[tokio::test]
async fn test_parallelism_is_bounded_per_cycle() {
    let activities = Arc::new(RecordingActivities::with_backlog(100));

    orchestrator(&activities)
        .run_cycle(DeletionJobId::new(), &checkpoint(5, 3))
        .await
        .unwrap();

    // One cycle takes at most batch_size * max_parallel_count watermarks
    assert_eq!(activities.deletes(), 3);
    assert_eq!(activities.remaining(), (1..=85).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_cancellation_leaves_checkpoint_untouched() {
    let activities = Arc::new(RecordingActivities::with_backlog(20));
    activities.slow_batches(Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let orchestrator = DeletionOrchestrator::new(activities.clone(), fast_retry(3), cancel.clone());

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run_cycle(DeletionJobId::new(), &checkpoint(10, 2)),
    )
    .await
    .expect("cancellation did not interrupt the cycle")
    .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(activities.remaining().len(), 20);
}
