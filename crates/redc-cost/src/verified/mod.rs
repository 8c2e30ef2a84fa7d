//! Pure pricing computations.
//!
//! Deterministic, side-effect free functions used by the async shell:
//! token bucket math, retry backoff, error classification and cost
//! arithmetic. Time is always passed in explicitly.
//!
//! # Tiger Style
//!
//! - Saturating arithmetic for integer time values
//! - No I/O or system calls

pub mod cost;
pub mod rate_limiter;
pub mod retry;

pub use cost::line_totals;
pub use cost::monthly_from_hourly;
pub use rate_limiter::calculate_replenished_tokens;
pub use rate_limiter::check_token_availability;
pub use rate_limiter::TokenAvailability;
pub use retry::compute_backoff_ms;
pub use retry::is_non_retryable_message;
