//! Bounded retries with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;

use crate::config::RetrySettings;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    name: String,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Duration,
    stats: std::sync::Arc<Mutex<RetryStats>>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RetryStats {
    pub total_calls: u64,
    pub successful_first_try: u64,
    pub successful_after_retry: u64,
    pub total_failures: u64,
    pub retries_performed: u64,
}

impl RetryPolicy {
    pub fn new(name: impl Into<String>, settings: &RetrySettings) -> Self {
        Self {
            name: name.into(),
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: Duration::from_millis(settings.jitter_ms),
            stats: Default::default(),
        }
    }

    /// Delay before the given retry attempt (0-based), exponential with cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .as_millis()
            .saturating_mul(1u128 << attempt.min(32)) as u64;
        let capped = exp.min(self.max_delay.as_millis() as u64);
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            rand::rng().random_range(0..=jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }

    /// Run an async operation, retrying retryable failures up to the limit.
    /// Non-retryable errors (risk blocks, open circuits) return immediately.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.stats.lock().total_calls += 1;

        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => {
                    let mut stats = self.stats.lock();
                    if attempt == 0 {
                        stats.successful_first_try += 1;
                    } else {
                        stats.successful_after_retry += 1;
                    }
                    return Ok(v);
                }
                Err(e) => {
                    if !e.is_retryable() {
                        tracing::debug!(policy = %self.name, error = %e, "non-retryable");
                        self.stats.lock().total_failures += 1;
                        return Err(e);
                    }
                    if attempt >= self.max_retries {
                        tracing::warn!(
                            policy = %self.name,
                            max_retries = self.max_retries,
                            "retries exhausted"
                        );
                        self.stats.lock().total_failures += 1;
                        return Err(e);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    self.stats.lock().retries_performed += 1;
                    tracing::info!(
                        policy = %self.name,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    pub fn stats(&self) -> RetryStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            "test",
            &RetrySettings {
                max_retries,
                base_delay_ms: 1,
                max_delay_ms: 4,
                jitter_ms: 0,
            },
        )
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let policy = RetryPolicy::new(
            "test",
            &RetrySettings {
                max_retries: 5,
                base_delay_ms: 100,
                max_delay_ms: 1000,
                jitter_ms: 0,
            },
        );
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy::new(
            "test",
            &RetrySettings {
                max_retries: 1,
                base_delay_ms: 100,
                max_delay_ms: 100,
                jitter_ms: 50,
            },
        );
        for _ in 0..20 {
            let d = policy.delay_for_attempt(0);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_first_try_success() {
        let policy = fast_policy(3);
        let result: Result<i32> = policy.run(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        let stats = policy.stats();
        assert_eq!(stats.successful_first_try, 1);
        assert_eq!(stats.retries_performed, 0);
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let policy = fast_policy(3);
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<i32> = policy
            .run(|| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BotError::WebSocket("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(policy.stats().successful_after_retry, 1);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let policy = fast_policy(2);
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<i32> = policy
            .run(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(BotError::WebSocket("down".into()))
                }
            })
            .await;
        assert!(result.is_err());
        // initial attempt + 2 retries
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(policy.stats().total_failures, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_short_circuits() {
        let policy = fast_policy(5);
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let result: Result<i32> = policy
            .run(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(BotError::RiskLimit("max exposure".into()))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
