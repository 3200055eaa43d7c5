//! Bounded retry with exponential backoff for external calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::ProviderError;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Cap for both computed backoff and server-provided `Retry-After`
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt` (0-based). A server-provided
    /// delay wins over the computed backoff.
    pub fn calculate_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(server_delay) = retry_after {
            return server_delay.min(self.max_delay);
        }

        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay = Duration::from_millis((self.base_delay.as_millis() as f64 * multiplier) as u64);
        delay.min(self.max_delay)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. Each attempt is bounded by `call_timeout`; a timeout
    /// counts as a retryable failure.
    ///
    /// Returns the final result together with the number of attempts made.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        call_timeout: Duration,
        mut call: F,
    ) -> (Result<T, ProviderError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match timeout(call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(call_timeout)),
            };
            attempt += 1;

            match result {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if e.is_retryable() && attempt < self.max_attempts() => {
                    let delay = self.calculate_delay(attempt - 1, e.retry_after());
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                        label,
                        attempt,
                        self.max_attempts(),
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.calculate_delay(0, None), Duration::from_millis(500));
        assert_eq!(policy.calculate_delay(2, None), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(4, None), Duration::from_secs(3));
        assert_eq!(
            policy.calculate_delay(0, Some(Duration::from_secs(10))),
            Duration::from_secs(3)
        );
    }

    #[tokio::test]
    async fn test_retries_rate_limited_then_succeeds() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let (result, attempts) = RetryPolicy::immediate(3)
            .run("test", Duration::from_secs(1), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::RateLimited { retry_after: None })
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let (result, attempts): (Result<(), _>, _) = RetryPolicy::immediate(2)
            .run("test", Duration::from_secs(1), || async {
                Err(ProviderError::RateLimited { retry_after: None })
            })
            .await;
        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let (result, attempts): (Result<(), _>, _) = RetryPolicy::immediate(5)
            .run("test", Duration::from_secs(1), || async {
                Err(ProviderError::Failure("401 Unauthorized".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable_failure() {
        let (result, attempts): (Result<(), _>, _) = RetryPolicy::immediate(1)
            .run("test", Duration::from_millis(10), || async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(attempts, 2);
    }
}
