//! Cancellable waiting primitives shared by every suspension point.
//!
//! Every sleep and every external call made during a run goes through this
//! module so that cancelling the run's [`CancellationToken`] aborts it
//! promptly.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TkupError;

/// Sleep for `duration`, returning `Cancelled` if the token fires first.
pub async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<(), TkupError> {
    if duration.is_zero() {
        return if cancel.is_cancelled() {
            Err(TkupError::Cancelled)
        } else {
            Ok(())
        };
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TkupError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Run one external call bounded by `limit` and the cancellation token.
pub async fn bounded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    operation: &str,
    fut: F,
) -> Result<T, TkupError>
where
    F: Future<Output = Result<T, TkupError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TkupError::Cancelled),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(TkupError::Timeout {
                operation: operation.to_string(),
                details: format!("exceeded {}", format_duration(limit)),
            }),
        },
    }
}

/// Fixed-attempt, fixed-delay retry applied at the call site of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Call `f` until it succeeds, returns a non-retryable error, or the
    /// attempts are exhausted. The delay between attempts is cancellable.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        mut f: F,
    ) -> Result<T, TkupError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TkupError>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed, retrying in {}",
                        format_duration(self.delay)
                    );
                    pause(cancel, self.delay).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Human readable duration: `8m`, `2m30s`, `30s`, `250ms`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    match (secs / 60, secs % 60) {
        (0, s) => format!("{s}s"),
        (m, 0) => format!("{m}m"),
        (m, s) => format!("{m}m{s}s"),
    }
}
