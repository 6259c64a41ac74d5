//! Timeout, retry, and cancellation around remote calls.

use super::error::{DeletionError, DeletionResult};
use pacs_core::RetryPolicy;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `call` under `policy`.
///
/// Each attempt is bounded by `policy.attempt_timeout`. Transient failures
/// are retried with backoff until `policy.max_attempts` is spent; anything
/// else is returned as-is. Cancellation aborts both the in-flight attempt
/// and any pending backoff sleep.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &'static str,
    mut call: F,
) -> DeletionResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DeletionResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeletionError::Cancelled),
            result = tokio::time::timeout(policy.attempt_timeout, call()) => match result {
                Ok(inner) => inner,
                Err(_) => Err(DeletionError::Timeout {
                    operation,
                    timeout: policy.attempt_timeout,
                }),
            },
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_transient() {
            return Err(err);
        }

        if attempt >= max_attempts {
            tracing::error!(
                operation,
                attempts = attempt,
                error = %err,
                "Retries exhausted"
            );
            return Err(DeletionError::RetriesExhausted {
                operation,
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeletionError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
