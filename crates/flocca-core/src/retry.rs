//! Exponential backoff for rate-limited outbound calls.
//!
//! Retries are keyed on the classified error: only [`Error::RateLimited`]
//! triggers a retry, everything else is fatal and returned as-is.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Retry policy for 429 responses.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay when the server did not send `Retry-After`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Delay before retry number `attempt` (1-based):
/// `retry_after.unwrap_or(base) * 2^(attempt - 1)`.
pub fn backoff_delay(policy: &RetryPolicy, retry_after: Option<u64>, attempt: u32) -> Duration {
    let base = retry_after
        .map(Duration::from_secs)
        .unwrap_or(policy.base_delay);
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Run `op`, retrying on `RATE_LIMITED` up to `policy.max_retries` times
/// with exponential backoff, honoring the server's `Retry-After` when
/// present.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Err(Error::RateLimited { retry_after, .. }) if attempt <= policy.max_retries => {
                let delay = backoff_delay(policy, retry_after, attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(backoff_delay(&policy, None, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(&policy, None, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(&policy, None, 3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_delay_honors_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(backoff_delay(&policy, Some(5), 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(&policy, Some(5), 2), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_fails() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<()> = with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::rate_limited("throttled", Some(1))) }
        })
        .await;

        assert!(matches!(result, Err(Error::RateLimited { .. })));
        // initial attempt + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result = with_backoff(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::rate_limited("throttled", None))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: Result<()> = with_backoff(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Auth("denied".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
