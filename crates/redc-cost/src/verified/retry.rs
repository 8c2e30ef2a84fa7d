//! Retry backoff and error classification.
//!
//! # Tiger Style
//!
//! - All time values in milliseconds (u64)
//! - Cap applied during iteration so intermediate values never overflow

/// Lowercase substrings marking an error as permanent.
pub const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "invalidinstancetype",
    "invalid instance type",
    "instance type does not exist",
    "valuenotsupported",
    "value not supported",
    "unsupported resource type",
    "invalid resource type",
    "resource type not found",
    "invalid credentials format",
    "malformed credentials",
    "invalidsystemdiskcategory",
    "invalid system disk category",
    "systemdisk.category is not valid",
    "notsupportdiskcategory",
    "not support disk category",
    "pricing not available for provider",
    "unsupported provider",
];

/// Whether an error message names a permanent failure.
///
/// # Example
///
/// ```
/// use redc_cost::verified::is_non_retryable_message;
///
/// assert!(is_non_retryable_message("InvalidInstanceType.NotFound: t9.huge"));
/// assert!(!is_non_retryable_message("request timed out"));
/// ```
pub fn is_non_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    NON_RETRYABLE_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Compute the backoff before the retry that follows `attempt`.
///
/// `initial_ms * multiplier^attempt`, capped at `max_ms`. `attempt` is
/// zero-based: the wait after the first failure uses `attempt = 0`.
///
/// # Example
///
/// ```
/// use redc_cost::verified::compute_backoff_ms;
///
/// assert_eq!(compute_backoff_ms(1000, 2.0, 0, 30_000), 1000);
/// assert_eq!(compute_backoff_ms(1000, 2.0, 2, 30_000), 4000);
/// assert_eq!(compute_backoff_ms(1000, 2.0, 10, 30_000), 30_000);
/// ```
#[inline]
pub fn compute_backoff_ms(initial_ms: u64, multiplier: f64, attempt: u32, max_ms: u64) -> u64 {
    debug_assert!(multiplier >= 1.0, "BACKOFF: multiplier must be >= 1");

    let mut delay = initial_ms as f64;
    for _ in 0..attempt {
        delay = (delay * multiplier).min(max_ms as f64);
    }
    let delay = (delay.min(max_ms as f64)).max(0.0) as u64;

    debug_assert!(delay <= max_ms, "BACKOFF: delay {delay} exceeds cap {max_ms}");
    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let delays: Vec<u64> = (0..6).map(|attempt| compute_backoff_ms(1000, 2.0, attempt, 30_000)).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000, 30_000]);
    }

    #[test]
    fn test_backoff_initial_above_cap() {
        assert_eq!(compute_backoff_ms(60_000, 2.0, 0, 30_000), 30_000);
    }

    #[test]
    fn test_backoff_huge_attempt_saturates() {
        assert_eq!(compute_backoff_ms(1000, 2.0, u32::MAX / 1_000_000, 30_000), 30_000);
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        assert!(is_non_retryable_message("Value Not Supported for SystemDisk"));
        assert!(is_non_retryable_message("pricing not available for provider: gcp"));
        assert!(!is_non_retryable_message("503 Service Unavailable"));
    }
}
