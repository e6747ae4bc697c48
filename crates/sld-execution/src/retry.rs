//! Retry driver for side-effecting steps.
//!
//! Attempt `n` (1-based) that fails with a retryable error is followed by a
//! wait of `initial_interval * coefficient^(n-1)`, capped at `max_interval`.
//! The driver gives up when:
//! - the error is not retryable,
//! - `max_attempts` have been made,
//! - the next attempt could not start before the schedule-to-close deadline.
//!
//! A running attempt is also cut off at the deadline.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use sld_config::ExecutionConfig;
use sld_schemas::Retryable;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub schedule_to_close: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(cfg.initial_interval_ms),
            backoff_coefficient: cfg.backoff_coefficient,
            max_interval: Duration::from_millis(cfg.max_interval_ms),
            max_attempts: cfg.max_attempts.max(1),
            schedule_to_close: Duration::from_millis(cfg.schedule_to_close_ms),
        }
    }

    /// Wait after failed attempt `attempt` (1-based).
    pub fn interval_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_coefficient.max(1.0).powi(exp);
        let secs = self.initial_interval.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(secs)
    }
}

#[derive(Debug, Error)]
pub enum ActivityError<E>
where
    E: fmt::Display + fmt::Debug,
{
    #[error("{activity} exhausted after {attempts} attempts: {last}")]
    Exhausted {
        activity: String,
        attempts: u32,
        last: E,
    },

    #[error("{activity} failed permanently on attempt {attempt}: {error}")]
    NonRetryable {
        activity: String,
        attempt: u32,
        error: E,
    },

    #[error("{activity} timed out after {attempts} attempts")]
    TimedOut {
        activity: String,
        attempts: u32,
        last: Option<E>,
    },
}

impl<E> ActivityError<E>
where
    E: fmt::Display + fmt::Debug,
{
    /// The most recent underlying error, if any attempt completed.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            ActivityError::Exhausted { last, .. } => Some(last),
            ActivityError::NonRetryable { error, .. } => Some(error),
            ActivityError::TimedOut { last, .. } => last.as_ref(),
        }
    }

    pub fn into_last_error(self) -> Option<E> {
        match self {
            ActivityError::Exhausted { last, .. } => Some(last),
            ActivityError::NonRetryable { error, .. } => Some(error),
            ActivityError::TimedOut { last, .. } => last,
        }
    }
}

/// Run `op` under `policy`. `op` receives the 1-based attempt number.
pub async fn run_activity<T, E, F, Fut>(
    activity: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, ActivityError<E>>
where
    E: Retryable + fmt::Display + fmt::Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let deadline = Instant::now() + policy.schedule_to_close;
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;
    let mut last: Option<E> = None;

    loop {
        attempt += 1;
        let err = match timeout_at(deadline, op(attempt)).await {
            Ok(Ok(v)) => {
                if attempt > 1 {
                    debug!(activity, attempt, "activity succeeded after retry");
                }
                return Ok(v);
            }
            Ok(Err(e)) => e,
            Err(_) => {
                return Err(ActivityError::TimedOut {
                    activity: activity.to_string(),
                    attempts: attempt,
                    last,
                })
            }
        };

        if !err.is_retryable() {
            return Err(ActivityError::NonRetryable {
                activity: activity.to_string(),
                attempt,
                error: err,
            });
        }
        if attempt >= max_attempts {
            return Err(ActivityError::Exhausted {
                activity: activity.to_string(),
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.interval_after(attempt);
        if Instant::now() + delay >= deadline {
            return Err(ActivityError::TimedOut {
                activity: activity.to_string(),
                attempts: attempt,
                last: Some(err),
            });
        }
        warn!(
            activity,
            attempt,
            error = %err,
            retry_in_ms = delay.as_millis() as u64,
            "activity attempt failed; retrying"
        );
        last = Some(err);
        tokio::time::sleep(delay).await;
    }
}
