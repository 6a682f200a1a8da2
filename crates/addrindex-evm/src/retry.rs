//! Exponential backoff for node requests.

use std::future::Future;
use std::time::Duration;

use addrindex_core::{IndexerError, RetrySettings};

/// Stateless retry policy. Computes the delay before each retry and runs an
/// operation until it succeeds, fails permanently, or runs out of attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            multiplier: settings.multiplier,
        }
    }

    /// Returns the delay before the `attempt`-th retry (1-based), or `None`
    /// once `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let base_ms =
            self.initial_backoff.as_millis() as f64 * self.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Run `op`, retrying transient failures. Permanent errors are returned
    /// as-is; exhausting the budget yields `RetriesExhausted`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => match self.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            what,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying node request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(what, attempt, error = %e, "max retries exceeded");
                        return Err(IndexerError::RetriesExhausted {
                            attempts: attempt,
                            reason: e.to_string(),
                        });
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy::new(&RetrySettings {
            max_retries,
            initial_backoff_ms: initial_ms,
            max_backoff_ms: max_ms,
            multiplier,
        })
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let p = RetryPolicy::default();
        let delays: Vec<u128> = (1..=5).map(|a| p.next_delay(a).unwrap().as_millis()).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        assert!(p.next_delay(6).is_none());
        assert!(p.next_delay(0).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let p = policy(10, 100, 500, 10.0);
        assert_eq!(p.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(p.next_delay(5).unwrap().as_millis(), 500);
    }

    #[test]
    fn should_retry_boundary() {
        let p = policy(2, 1, 1, 2.0);
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let p = policy(3, 0, 0, 2.0);
        let value = p
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(IndexerError::Rpc("connection reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts() {
        let p = policy(2, 0, 0, 2.0);
        let err = p
            .run("test", || async { Err::<(), _>(IndexerError::Rpc("down".into())) })
            .await
            .unwrap_err();
        match err {
            IndexerError::RetriesExhausted { attempts, reason } => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("down"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let p = policy(5, 0, 0, 2.0);
        let err = p
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(IndexerError::Config("bad".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
