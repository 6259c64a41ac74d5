//! Retry policy applied around remote calls.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest `cleanup_after` push-out applied to a failing deletion.
pub const MAX_CLEANUP_BACKOFF: time::Duration = time::Duration::DAY;

/// Bounded exponential retry for transient failures.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_coefficient: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Timeout applied to each individual attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt.
    pub fn no_retry(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_coefficient: 1.0,
            max_delay: Duration::ZERO,
            attempt_timeout,
        }
    }

    /// Delay to wait after `attempt` (1-based) has failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let factor = self.backoff_coefficient.max(1.0).powi(exponent);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_delay: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(300),
        }
    }
}

/// How far to push `cleanup_after` once a deletion has failed `retry_count` times.
///
/// Doubles from `base` per retry, capped at [`MAX_CLEANUP_BACKOFF`].
pub fn cleanup_backoff(base: time::Duration, retry_count: i32) -> time::Duration {
    if base <= time::Duration::ZERO {
        return time::Duration::ZERO;
    }
    let exponent = retry_count.saturating_sub(1).clamp(0, 30) as u32;
    base.checked_mul(1_i32 << exponent)
        .map(|d| d.min(MAX_CLEANUP_BACKOFF))
        .unwrap_or(MAX_CLEANUP_BACKOFF)
}
