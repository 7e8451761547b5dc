//! Bounded retry for store adapter calls.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::Deadline;
use crate::error::StoreResult;

/// Hard ceiling on attempts per call, whatever the configuration says.
pub const MAX_ATTEMPTS: u32 = 3;

/// Retry policy applied inside the adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Creates a policy; attempts are clamped to `1..=MAX_ATTEMPTS`.
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS),
            base_backoff,
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Runs `op` under `deadline`, retrying retryable errors with exponential backoff.
    ///
    /// Backoff sleeps never extend past the deadline.
    pub async fn run<T, F, Fut>(&self, op_name: &'static str, deadline: Deadline, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match deadline.run(op()).await {
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let backoff = self.base_backoff * 2u32.pow(attempt - 1);
                    if backoff >= deadline.remaining() {
                        return Err(err);
                    }
                    debug!(op = op_name, attempt, error = %err, "retrying store call");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, Duration::from_millis(50))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_attempts_are_clamped() {
        assert_eq!(RetryPolicy::new(10, Duration::ZERO).max_attempts, MAX_ATTEMPTS);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retries_unavailable_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run("test", Deadline::after(Duration::from_secs(1)), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Unavailable("flaky".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: StoreResult<()> = policy
            .run("test", Deadline::after(Duration::from_secs(1)), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Unavailable("down".into()))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_backend_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: StoreResult<()> = RetryPolicy::default()
            .run("test", Deadline::after(Duration::from_secs(1)), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Backend("syntax".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let result: StoreResult<()> = RetryPolicy::none()
            .run("test", Deadline::after(Duration::from_millis(10)), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(StoreError::Timeout));
    }
}
