//! Error types for pricing and cost estimation.
//!
//! Two families:
//!
//! - [`PricingError`]: outcome of a pricing lookup. It is `Clone` because one
//!   in-flight fetch hands the same result to every waiting caller.
//! - [`CostError`]: storage and setup failures (cache database, fallback file).

use std::path::PathBuf;

use snafu::Snafu;

/// Result type for cache and setup operations.
pub type Result<T> = std::result::Result<T, CostError>;

/// Pricing lookup failures.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum PricingError {
    /// Permanent error; retrying cannot help.
    #[snafu(display("non-retryable error: {message}"))]
    NonRetryable {
        /// Underlying error text.
        message: String,
    },

    /// Transient error from a live provider call.
    #[snafu(display("{message}"))]
    Transient {
        /// Underlying error text.
        message: String,
    },

    /// Every retry failed.
    #[snafu(display("operation failed after {retries} retries: {message}"))]
    RetriesExhausted {
        /// Retries made after the first attempt.
        retries: u32,
        /// Error text of the last attempt.
        message: String,
    },

    /// No live pricing integration for this provider.
    #[snafu(display("pricing not available for provider: {provider}"))]
    UnsupportedProvider {
        /// Provider name.
        provider: String,
    },

    /// No token bucket is configured for the provider.
    #[snafu(display("no rate limiter configured for provider: {provider}"))]
    NoRateLimiter {
        /// Provider name.
        provider: String,
    },

    /// Credentials could not be obtained.
    #[snafu(display("credentials unavailable for provider {provider}: {message}"))]
    MissingCredentials {
        /// Provider name.
        provider: String,
        /// Reason.
        message: String,
    },

    /// The static fallback table has no entry or failed.
    #[snafu(display("fallback pricing failed: {message}"))]
    Fallback {
        /// Reason.
        message: String,
    },

    /// The caller canceled the lookup.
    #[snafu(display("pricing lookup canceled by caller"))]
    Canceled,
}

impl PricingError {
    /// Whether the caller canceled the lookup.
    pub fn is_canceled(&self) -> bool {
        matches!(self, PricingError::Canceled)
    }

    /// Whether retrying this error is pointless.
    pub fn is_non_retryable(&self) -> bool {
        match self {
            PricingError::NonRetryable { .. }
            | PricingError::UnsupportedProvider { .. }
            | PricingError::NoRateLimiter { .. }
            | PricingError::MissingCredentials { .. }
            | PricingError::Canceled => true,
            other => crate::verified::retry::is_non_retryable_message(&other.to_string()),
        }
    }
}

/// Storage and setup errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CostError {
    /// Failed to open the cache database.
    #[snafu(display("failed to open pricing cache {}: {source}", path.display()))]
    OpenCache {
        /// Database path.
        path: PathBuf,
        /// Underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to create the cache's parent directory.
    #[snafu(display("failed to create cache directory {}: {source}", path.display()))]
    CreateCacheDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A cache statement failed.
    #[snafu(display("pricing cache {operation} failed: {source}"))]
    CacheQuery {
        /// Statement kind.
        operation: &'static str,
        /// Underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Pricing payload could not be encoded or decoded.
    #[snafu(display("invalid pricing payload: {source}"))]
    Payload {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Failed to read the fallback table.
    #[snafu(display("failed to read fallback pricing file {}: {source}", path.display()))]
    ReadFallback {
        /// File path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// Fallback table is not valid JSON.
    #[snafu(display("failed to parse fallback pricing file {}: {source}", path.display()))]
    ParseFallback {
        /// File path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The HTTP client could not be built.
    #[snafu(display("failed to build http client: {source}"))]
    HttpClient {
        /// Underlying reqwest error.
        source: reqwest::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_variants_are_non_retryable() {
        assert!(PricingError::UnsupportedProvider { provider: "gcp".into() }.is_non_retryable());
        assert!(PricingError::Canceled.is_non_retryable());
    }

    #[test]
    fn test_transient_classified_by_message() {
        let permanent = PricingError::Transient {
            message: "InvalidInstanceType: t9.huge".into(),
        };
        assert!(permanent.is_non_retryable());

        let flaky = PricingError::Transient {
            message: "connection reset by peer".into(),
        };
        assert!(!flaky.is_non_retryable());
    }

    #[test]
    fn test_unsupported_provider_message() {
        let err = PricingError::UnsupportedProvider { provider: "gcp".into() };
        assert_eq!(err.to_string(), "pricing not available for provider: gcp");
    }
}
