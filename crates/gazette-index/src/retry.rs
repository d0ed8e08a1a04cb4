//! Retry with exponential backoff for retryable index failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use gazette_core::defaults::{MAX_RETRIES, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS};
use gazette_core::Result;

/// Compute the backoff delay for a 1-based attempt number.
///
/// Exponential in the attempt, capped, with up to 50% random jitter so
/// workers retrying the same contended document do not stampede in step.
fn backoff_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY_MS
        .saturating_mul(1u64 << (attempt - 1).min(16))
        .min(RETRY_MAX_DELAY_MS);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

/// Run `op` until it succeeds, fails permanently, or exhausts the retry
/// budget. Only errors classified as retryable (transient failures and
/// version conflicts) are retried.
pub async fn with_backoff<T, F, Fut>(op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                let delay = backoff_delay(attempt);
                tracing::warn!(
                    subsystem = "index",
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable index failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gazette_core::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let result = with_backoff("test", || async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transient("503".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_version_conflict() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::VersionConflict("doc-1".to_string()))
                } else {
                    Ok("fresh")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "fresh");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Permanent("400".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transient("flaky".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES);
    }

    #[test]
    fn test_backoff_delay_capped() {
        for attempt in 1..=10 {
            let delay = backoff_delay(attempt);
            assert!(delay.as_millis() as u64 <= RETRY_MAX_DELAY_MS + RETRY_MAX_DELAY_MS / 2);
        }
    }

    #[test]
    fn test_backoff_delay_grows() {
        // Lower bounds grow until the cap: base(n) = BASE << (n-1).
        let d1 = backoff_delay(1).as_millis() as u64;
        assert!(d1 >= RETRY_BASE_DELAY_MS);
        let d3 = backoff_delay(3).as_millis() as u64;
        assert!(d3 >= RETRY_BASE_DELAY_MS * 4);
    }
}
