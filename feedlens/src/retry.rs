//! The lock-retry policy (spec §4.4, §7): every Store write performed by the
//! pipeline is wrapped here. Exponential backoff with jitter; only errors the
//! Store classifies as transient ("locked"/"SQLITE_BUSY") are retried. Any
//! other error is returned immediately.

use crate::error::StoreError;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction, e.g. 0.3 means the delay is scaled by a factor in [0.7, 1.3].
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: 0.3,
        }
    }
}

/// Run `op` under the retry policy. `op` is re-invoked from scratch on each
/// attempt, so it must not have committed partial side effects on failure.
pub async fn retry_db_operation<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut backoff = ExponentialBackoff {
        current_interval: policy.initial_delay,
        initial_interval: policy.initial_delay,
        multiplier: 2.0,
        max_interval: policy.max_delay,
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let base = backoff.next_backoff().unwrap_or(policy.max_delay);
                let delay = jittered(base, policy.jitter);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "database busy, retrying write"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(attempts = attempt, "retry attempts exhausted on locked database");
                }
                return Err(e);
            }
        }
    }
}

fn jittered(base: Duration, jitter: f64) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-jitter..=jitter);
    let millis = (base.as_millis() as f64 * factor).max(0.0);
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::default();
        let result: Result<i32, StoreError> = retry_db_operation(&policy, || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_locked_then_succeeds() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: 0.1,
        };
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<&str, StoreError> = retry_db_operation(&policy, || {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Locked("database is locked".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::default();
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), StoreError> = retry_db_operation(&policy, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(StoreError::NotFound) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_on_persistent_lock() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.1,
        };
        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result: Result<(), StoreError> = retry_db_operation(&policy, || {
            attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(StoreError::Locked("locked".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
