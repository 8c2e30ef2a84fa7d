//! Pricing lookups and cost estimation.
//!
//! [`PricingService::get_pricing`] answers "what does this resource cost per
//! hour" through several layers:
//!
//! 1. a durable SQLite cache with a 24 hour TTL ([`PricingCache`])
//! 2. single-flight deduplication of concurrent identical lookups
//! 3. a per-provider token bucket ([`ProviderRateLimiters`])
//! 4. exponential-backoff retry that stops early on permanent errors
//! 5. a static fallback table ([`FallbackTable`]) when live pricing is
//!    unavailable
//!
//! [`CostCalculator`] aggregates lookups for a template's resources into a
//! [`CostEstimate`].
//!
//! # Tiger Style
//!
//! - Arithmetic and classification live in [`verified`] as pure functions
//! - Every network wait honors a cancellation token
//! - Bounded retries and bounded waits

#![warn(missing_docs)]

pub mod cache;
pub mod calculator;
pub mod credentials;
pub mod error;
pub mod fallback;
pub mod rate_limiter;
pub mod retry;
pub mod service;
pub mod source;
pub mod types;
pub mod verified;

pub use cache::PricingCache;
pub use calculator::CostCalculator;
pub use credentials::CredentialProvider;
pub use credentials::Credentials;
pub use credentials::EnvCredentialProvider;
pub use error::CostError;
pub use error::PricingError;
pub use fallback::FallbackFn;
pub use fallback::FallbackPricing;
pub use fallback::FallbackTable;
pub use rate_limiter::ProviderRateLimiters;
pub use rate_limiter::TokenBucket;
pub use retry::RetryConfig;
pub use service::PricingLookup;
pub use service::PricingService;
pub use source::HttpPricingSource;
pub use source::PricingSource;
pub use types::CostBreakdown;
pub use types::CostEstimate;
pub use types::PricingData;
pub use types::PricingTier;
pub use types::ResourceSpec;
pub use types::TemplateResources;

/// Fixed month length used to derive monthly prices from hourly ones.
pub const HOURS_PER_MONTH: f64 = 720.0;

/// Providers with live pricing support.
pub const SUPPORTED_PROVIDERS: &[&str] = &["alicloud", "tencentcloud", "aws", "volcengine"];
