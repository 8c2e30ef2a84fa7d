//! Token bucket math.
//!
//! # Tiger Style
//!
//! - Elapsed time uses saturating_sub, so clock skew never adds tokens
//! - Results are bounded by capacity

/// Calculate available tokens after replenishment.
///
/// # Arguments
///
/// * `current_tokens` - Current token count (can be fractional)
/// * `elapsed_ms` - Milliseconds since the last refill
/// * `refill_rate` - Tokens added per second
/// * `capacity` - Maximum token capacity
///
/// # Example
///
/// ```
/// use redc_cost::verified::calculate_replenished_tokens;
///
/// // 1 second elapsed at 10 tokens/sec
/// let available = calculate_replenished_tokens(0.0, 1000, 10.0, 100.0);
/// assert!((available - 10.0).abs() < 0.001);
/// ```
#[inline]
pub fn calculate_replenished_tokens(current_tokens: f64, elapsed_ms: u64, refill_rate: f64, capacity: f64) -> f64 {
    let elapsed_secs = elapsed_ms as f64 / 1000.0;
    let replenished = elapsed_secs * refill_rate.max(0.0);
    let result = (current_tokens + replenished).min(capacity);

    debug_assert!(result <= capacity, "REFILL: tokens {result} exceed capacity {capacity}");
    result
}

/// Result of a token availability check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenAvailability {
    /// A token can be taken.
    Available {
        /// Tokens left after taking one.
        remaining: f64,
    },
    /// The bucket is empty.
    Exhausted {
        /// Time until one full token has accumulated.
        retry_after_ms: u64,
    },
}

impl TokenAvailability {
    /// Check if a token is available.
    #[inline]
    pub fn is_available(&self) -> bool {
        matches!(self, TokenAvailability::Available { .. })
    }
}

/// Check whether one token can be taken, or how long to wait for it.
///
/// The wait is `(1 - available) / refill_rate` seconds, rounded up to the
/// next millisecond. A zero refill rate never refills.
///
/// # Example
///
/// ```
/// use redc_cost::verified::{check_token_availability, TokenAvailability};
///
/// assert!(check_token_availability(1.5, 10.0).is_available());
/// assert_eq!(
///     check_token_availability(0.5, 10.0),
///     TokenAvailability::Exhausted { retry_after_ms: 50 }
/// );
/// ```
#[inline]
pub fn check_token_availability(available: f64, refill_rate: f64) -> TokenAvailability {
    if available >= 1.0 {
        return TokenAvailability::Available {
            remaining: available - 1.0,
        };
    }

    let deficit = 1.0 - available;
    let retry_after_ms = if refill_rate > 0.0 {
        ((deficit / refill_rate) * 1000.0).ceil() as u64
    } else {
        u64::MAX
    };
    TokenAvailability::Exhausted { retry_after_ms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replenish_partial_second() {
        let available = calculate_replenished_tokens(0.0, 500, 10.0, 100.0);
        assert!((available - 5.0).abs() < 0.001);
    }

    #[test]
    fn test_replenish_caps_at_capacity() {
        let available = calculate_replenished_tokens(45.0, 10_000, 500.0 / 60.0, 50.0);
        assert!((available - 50.0).abs() < 0.001);
    }

    #[test]
    fn test_replenish_zero_rate() {
        let available = calculate_replenished_tokens(3.0, 10_000, 0.0, 10.0);
        assert!((available - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_availability_consumes_one() {
        match check_token_availability(10.0, 10.0) {
            TokenAvailability::Available { remaining } => assert!((remaining - 9.0).abs() < 0.001),
            other => panic!("expected Available, got {other:?}"),
        }
    }

    #[test]
    fn test_exhausted_wait_matches_refill_rate() {
        // 10 tokens/sec, empty bucket -> 100ms for one token
        assert_eq!(check_token_availability(0.0, 10.0), TokenAvailability::Exhausted { retry_after_ms: 100 });
    }

    #[test]
    fn test_exhausted_zero_refill() {
        assert_eq!(check_token_availability(0.0, 0.0), TokenAvailability::Exhausted { retry_after_ms: u64::MAX });
    }
}
