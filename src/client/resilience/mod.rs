//! Retry with exponential backoff for provider calls.

mod backoff;

pub use backoff::ExponentialBackoff;

use std::future::Future;
use std::time::Duration;

use crate::config::settings::DEFAULT_STOP_AFTER_ATTEMPT;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub stop_after_attempt: u32,
    pub backoff: ExponentialBackoff,
    /// Bound on a single attempt. Elapsing becomes [`Error::Timeout`], which is retried.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            stop_after_attempt: DEFAULT_STOP_AFTER_ATTEMPT,
            backoff: ExponentialBackoff::default(),
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            stop_after_attempt: 1,
            ..Default::default()
        }
    }

    pub fn stop_after_attempt(mut self, attempts: u32) -> Self {
        self.stop_after_attempt = attempts;
        self
    }

    pub fn backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// One failed attempt inside a single [`RetryManager::execute`] run.
#[derive(Debug)]
pub struct RetryAttempt {
    pub attempt: u32,
    /// Total backoff slept before this attempt started.
    pub slept: Duration,
    pub error: Error,
}

/// Successful result plus how many attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
    pub slept: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent. The closure receives the 1-based attempt number.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<Retried<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.stop_after_attempt.max(1);
        let mut slept = Duration::ZERO;
        let mut attempt = 1;

        loop {
            let result = match self.config.attempt_timeout {
                Some(limit) => tokio::time::timeout(limit, operation(attempt))
                    .await
                    .unwrap_or_else(|_| Err(Error::Timeout(limit))),
                None => operation(attempt).await,
            };

            let failed = match result {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                        slept,
                    });
                }
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => RetryAttempt {
                    attempt,
                    slept,
                    error,
                },
            };

            if failed.attempt >= max_attempts {
                tracing::warn!(
                    attempts = failed.attempt,
                    slept_ms = failed.slept.as_millis() as u64,
                    error = %failed.error,
                    "retries exhausted"
                );
                return Err(Error::RetriesExhausted {
                    attempts: failed.attempt,
                    last: Box::new(failed.error),
                });
            }

            let delay = self
                .config
                .backoff
                .delay_with_hint(failed.attempt, failed.error.retry_after());
            tracing::warn!(
                attempt = failed.attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failed.error,
                "transient failure, retrying"
            );
            tokio::time::sleep(delay).await;

            slept += delay;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn overloaded() -> Error {
        Error::Api {
            message: "overloaded".into(),
            status: Some(529),
            error_type: Some("overloaded_error".into()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_exactly_k_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let manager = RetryManager::new(RetryConfig::default().stop_after_attempt(4));

        let counter = calls.clone();
        let err = manager
            .execute(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(overloaded())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            Error::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, Error::Api { status: Some(529), .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let manager = RetryManager::default();

        let counter = calls.clone();
        let err = manager
            .execute(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(Error::auth("invalid x-api-key"))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::Auth { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let manager = RetryManager::default();

        let retried = manager
            .execute(|attempt| async move {
                if attempt < 3 {
                    Err(Error::RateLimit { retry_after: None })
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(retried.value, 3);
        assert_eq!(retried.attempts, 3);
        assert_eq!(retried.slept, Duration::from_secs(4 + 8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_raises_wait() {
        let manager = RetryManager::default();

        let retried = manager
            .execute(|attempt| async move {
                if attempt == 1 {
                    Err(Error::RateLimit {
                        retry_after: Some(Duration::from_secs(45)),
                    })
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(retried.slept, Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let manager = RetryManager::new(
            RetryConfig::default()
                .stop_after_attempt(2)
                .attempt_timeout(Duration::from_secs(1)),
        );

        let err = manager
            .execute(|_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::RetriesExhausted { attempts: 2, ref last } if matches!(**last, Error::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let manager = RetryManager::new(RetryConfig::default().stop_after_attempt(0));

        let counter = calls.clone();
        let _ = manager
            .execute(|_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(overloaded())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
