// Shared retry logic for segment and key fetching: fixed backoff, a
// whitelist of transient statuses, and cooperative cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::PenguinError;

/// Retry descriptor passed as a plain value to the fetch paths.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the initial one included.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

/// Outcome of a single attempt.
pub enum RetryAction<T> {
    Success(T),
    /// Transient failure (whitelisted status, network, I/O).
    Retry(PenguinError),
    /// Permanent failure.
    Fail(PenguinError),
}

/// Run `operation` until success, permanent failure, exhaustion or
/// cancellation. The closure receives the 0-indexed attempt number.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, PenguinError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    for attempt in 0..policy.attempts {
        if token.is_cancelled() {
            return Err(PenguinError::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(err),
            RetryAction::Retry(err) => {
                if attempt + 1 >= policy.attempts {
                    return Err(err);
                }
                warn!(
                    attempt = attempt + 1,
                    of = policy.attempts,
                    error = %err,
                    "retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(PenguinError::Cancelled),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
            }
        }
    }

    Err(PenguinError::Internal {
        reason: "retry loop exited without result".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> PenguinError {
        PenguinError::SegmentFetch {
            reason: "503".into(),
            retryable: true,
        }
    }

    #[tokio::test]
    async fn succeeds_first_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let token = CancellationToken::new();
        let out = retry_with_backoff(&policy, &token, |_| async { RetryAction::Success(7u32) })
            .await
            .unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn exhausts_then_fails() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let out: Result<u32, _> = retry_with_backoff(&policy, &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Retry(transient()) }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn permanent_failure_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let out: Result<u32, _> = retry_with_backoff(&policy, &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async {
                RetryAction::Fail(PenguinError::SegmentFetch {
                    reason: "401".into(),
                    retryable: false,
                })
            }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn recovery_on_later_attempt() {
        let policy = RetryPolicy::new(4, Duration::from_millis(1));
        let token = CancellationToken::new();
        let out = retry_with_backoff(&policy, &token, |attempt| async move {
            if attempt < 2 {
                RetryAction::Retry(transient())
            } else {
                RetryAction::Success("done")
            }
        })
        .await
        .unwrap();
        assert_eq!(out, "done");
    }

    #[tokio::test]
    async fn cancellation_interrupts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let token = CancellationToken::new();
        token.cancel();
        let out: Result<u32, _> =
            retry_with_backoff(&policy, &token, |_| async { RetryAction::Success(1u32) }).await;
        assert!(matches!(out, Err(PenguinError::Cancelled)));
    }
}
