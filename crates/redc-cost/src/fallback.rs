//! Static fallback pricing.
//!
//! The fallback table is a JSON document keyed `provider -> region -> type`:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "last_updated": "2025-01-01",
//!   "pricing": {
//!     "aws": {
//!       "us-east-1": {
//!         "t2.micro": { "provider": "aws", "region": "us-east-1",
//!                       "resource_type": "t2.micro", "currency": "USD",
//!                       "hourly_price": 0.0116, "monthly_price": 8.47 }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use snafu::ResultExt;

use crate::error::ParseFallbackSnafu;
use crate::error::PricingError;
use crate::error::ReadFallbackSnafu;
use crate::types::PricingData;

/// Source of last-resort prices.
#[async_trait]
pub trait FallbackPricing: Send + Sync {
    /// Price for the key, or [`PricingError::Fallback`] if unknown.
    async fn lookup(&self, provider: &str, region: &str, resource_type: &str) -> Result<PricingData, PricingError>;
}

/// Wraps a synchronous closure as a [`FallbackPricing`].
pub struct FallbackFn<F>(pub F);

#[async_trait]
impl<F> FallbackPricing for FallbackFn<F>
where F: Fn(&str, &str, &str) -> Result<PricingData, PricingError> + Send + Sync
{
    async fn lookup(&self, provider: &str, region: &str, resource_type: &str) -> Result<PricingData, PricingError> {
        (self.0)(provider, region, resource_type)
    }
}

/// Fallback table loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackTable {
    /// Table format version.
    #[serde(default)]
    pub version: String,
    /// When the prices were collected.
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pricing: HashMap<String, HashMap<String, HashMap<String, PricingData>>>,
}

impl FallbackTable {
    /// Load the table from `path`.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path).context(ReadFallbackSnafu { path })?;
        serde_json::from_str(&raw).context(ParseFallbackSnafu { path })
    }

    /// Parse the table from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, data: PricingData) {
        self.pricing
            .entry(data.provider.clone())
            .or_default()
            .entry(data.region.clone())
            .or_default()
            .insert(data.resource_type.clone(), data);
    }

    /// Number of priced resource types across all providers and regions.
    pub fn len(&self) -> usize {
        self.pricing.values().flat_map(|regions| regions.values()).map(HashMap::len).sum()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Synchronous lookup.
    pub fn get(&self, provider: &str, region: &str, resource_type: &str) -> Result<PricingData, PricingError> {
        let regions = self.pricing.get(provider).ok_or_else(|| PricingError::Fallback {
            message: format!("provider {provider} not found in fallback database"),
        })?;
        let types = regions.get(region).ok_or_else(|| PricingError::Fallback {
            message: format!("region {region} not found for provider {provider} in fallback database"),
        })?;
        types.get(resource_type).cloned().ok_or_else(|| PricingError::Fallback {
            message: format!(
                "resource type {resource_type} not found for provider {provider}, region {region} in fallback database"
            ),
        })
    }
}

#[async_trait]
impl FallbackPricing for FallbackTable {
    async fn lookup(&self, provider: &str, region: &str, resource_type: &str) -> Result<PricingData, PricingError> {
        self.get(provider, region, resource_type)
    }
}
