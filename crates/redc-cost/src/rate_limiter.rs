//! Per-provider token buckets.
//!
//! Each bucket starts full. [`TokenBucket::wait`] refills, takes a token if
//! one is available, and otherwise sleeps for the computed time until the
//! next token. Sleeping happens outside the lock so other callers can refill
//! concurrently.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::PricingError;
use crate::verified::calculate_replenished_tokens;
use crate::verified::check_token_availability;
use crate::verified::TokenAvailability;

/// Upper bound on a single sleep inside [`TokenBucket::wait`].
const MAX_WAIT_SLICE: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket with fractional tokens.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Bucket holding `capacity` tokens, refilled at `refill_rate` tokens per second.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket allowing `per_minute` requests per minute with the given burst.
    pub fn per_minute(per_minute: u32, burst: u32) -> Self {
        Self::new(burst, f64::from(per_minute) / 60.0)
    }

    /// Maximum tokens.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed_ms = now.saturating_duration_since(state.last_refill).as_millis() as u64;
        state.tokens = calculate_replenished_tokens(state.tokens, elapsed_ms, self.refill_rate, self.capacity);
        // Only whole milliseconds were credited; the remainder carries over.
        state.last_refill += Duration::from_millis(elapsed_ms);
    }

    /// Take a token if one is available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        match check_token_availability(state.tokens, self.refill_rate) {
            TokenAvailability::Available { remaining } => {
                state.tokens = remaining;
                true
            }
            TokenAvailability::Exhausted { .. } => false,
        }
    }

    /// Tokens available after refilling.
    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    /// Wait until a token is taken or `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), PricingError> {
        loop {
            let retry_after_ms = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                match check_token_availability(state.tokens, self.refill_rate) {
                    TokenAvailability::Available { remaining } => {
                        state.tokens = remaining;
                        return Ok(());
                    }
                    TokenAvailability::Exhausted { retry_after_ms } => retry_after_ms,
                }
            };

            let wait = Duration::from_millis(retry_after_ms.max(1)).min(MAX_WAIT_SLICE);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(PricingError::Canceled),
            }
        }
    }
}

/// Token buckets keyed by provider name.
#[derive(Debug, Default)]
pub struct ProviderRateLimiters {
    buckets: HashMap<String, TokenBucket>,
}

impl ProviderRateLimiters {
    /// Empty set; every provider is unconfigured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits for the providers with live pricing:
    ///
    /// | provider     | rate            | burst |
    /// |--------------|-----------------|-------|
    /// | alicloud     | 500 per minute  | 50    |
    /// | tencentcloud | 20 per second   | 20    |
    /// | aws          | 10 per second   | 10    |
    /// | volcengine   | 20 per second   | 20    |
    pub fn with_defaults() -> Self {
        let mut limiters = Self::new();
        limiters.insert("alicloud", TokenBucket::per_minute(500, 50));
        limiters.insert("tencentcloud", TokenBucket::new(20, 20.0));
        limiters.insert("aws", TokenBucket::new(10, 10.0));
        limiters.insert("volcengine", TokenBucket::new(20, 20.0));
        limiters
    }

    /// Configure `provider` with `bucket`, replacing any previous bucket.
    pub fn insert(&mut self, provider: impl Into<String>, bucket: TokenBucket) {
        self.buckets.insert(provider.into(), bucket);
    }

    /// Bucket for `provider`.
    pub fn get(&self, provider: &str) -> Result<&TokenBucket, PricingError> {
        self.buckets.get(provider).ok_or_else(|| PricingError::NoRateLimiter {
            provider: provider.to_string(),
        })
    }

    /// Block until `provider` grants a request.
    pub async fn wait(&self, provider: &str, cancel: &CancellationToken) -> Result<(), PricingError> {
        self.get(provider)?.wait(cancel).await
    }

    /// Non-blocking variant of [`wait`](Self::wait).
    pub async fn try_acquire(&self, provider: &str) -> Result<bool, PricingError> {
        Ok(self.get(provider)?.try_acquire().await)
    }

    /// Tokens currently available for `provider`.
    pub async fn available_tokens(&self, provider: &str) -> Result<f64, PricingError> {
        Ok(self.get(provider)?.available_tokens().await)
    }
}
