//! Exponential-backoff retry for live pricing calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::PricingError;
use crate::verified::compute_backoff_ms;

/// Retry schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
    /// Cap on any single wait.
    pub max_backoff: Duration,
    /// Growth factor between waits.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Wait before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(compute_backoff_ms(
            self.initial_backoff.as_millis() as u64,
            self.multiplier,
            retry,
            self.max_backoff.as_millis() as u64,
        ))
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
///
/// A non-retryable failure returns immediately as
/// [`PricingError::NonRetryable`] (or as-is for structured variants such as
/// [`PricingError::Canceled`]). Running out of retries returns
/// [`PricingError::RetriesExhausted`] carrying the last error's text.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T, PricingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PricingError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(PricingError::Canceled);
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.is_non_retryable() {
            debug!(operation, error = %err, "not retrying permanent error");
            return Err(match err {
                PricingError::Transient { message } => PricingError::NonRetryable { message },
                other => other,
            });
        }

        if attempt >= config.max_retries {
            return Err(PricingError::RetriesExhausted {
                retries: config.max_retries,
                message: err.to_string(),
            });
        }

        let wait = config.backoff(attempt);
        warn!(operation, attempt = attempt + 1, wait_ms = wait.as_millis() as u64, error = %err, "retrying after error");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => return Err(PricingError::Canceled),
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;

    fn transient(message: &str) -> PricingError {
        PricingError::Transient {
            message: message.to_string(),
        }
    }

    #[test]
    fn test_default_schedule() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(2), Duration::from_secs(4));
        assert_eq!(config.backoff(10), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_four_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let counter = calls.clone();
        let result: Result<(), _> =
            retry_with_backoff(&RetryConfig::default(), &CancellationToken::new(), "fetch", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient("connection reset"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            result,
            Err(PricingError::RetriesExhausted {
                retries: 3,
                message: "connection reset".into()
            })
        );
        // 1s + 2s + 4s of backoff
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> =
            retry_with_backoff(&RetryConfig::default(), &CancellationToken::new(), "fetch", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient("InvalidInstanceType: t9.huge"))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(PricingError::NonRetryable { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff(&RetryConfig::default(), &CancellationToken::new(), "fetch", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient("throttled"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let result: Result<(), _> = retry_with_backoff(&RetryConfig::default(), &cancel, "fetch", || async {
            Err(transient("timeout"))
        })
        .await;
        assert_eq!(result, Err(PricingError::Canceled));
    }
}
