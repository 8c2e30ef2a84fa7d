//! Pricing and estimate types.

use std::collections::BTreeMap;

use redc_core::DynValue;
use serde::Deserialize;
use serde::Serialize;

use crate::HOURS_PER_MONTH;

/// One band of tiered pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    /// First unit covered by this band.
    pub min_units: i64,
    /// Last unit covered by this band.
    pub max_units: i64,
    /// Price per unit within the band.
    pub price_per_unit: f64,
}

/// Unit price of a resource type in one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingData {
    /// Provider name, e.g. `aws`.
    pub provider: String,
    /// Region code.
    pub region: String,
    /// Resource type, e.g. `t2.micro`.
    pub resource_type: String,
    /// ISO currency code.
    #[serde(default)]
    pub currency: String,
    /// Price per hour.
    pub hourly_price: f64,
    /// Price per month as reported by the provider.
    #[serde(default)]
    pub monthly_price: f64,
    /// Optional tiered pricing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pricing_tiers: Vec<PricingTier>,
    /// Provider specific metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, DynValue>,
}

impl PricingData {
    /// Price with `monthly_price` derived from the hourly price.
    pub fn hourly(
        provider: impl Into<String>,
        region: impl Into<String>,
        resource_type: impl Into<String>,
        currency: impl Into<String>,
        hourly_price: f64,
    ) -> Self {
        Self {
            provider: provider.into(),
            region: region.into(),
            resource_type: resource_type.into(),
            currency: currency.into(),
            hourly_price,
            monthly_price: hourly_price * HOURS_PER_MONTH,
            pricing_tiers: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Deduplication and cache key, `provider:region:resource_type`.
    pub fn key(&self) -> String {
        pricing_key(&self.provider, &self.region, &self.resource_type)
    }
}

/// Build the `provider:region:resource_type` key.
pub fn pricing_key(provider: &str, region: &str, resource_type: &str) -> String {
    format!("{provider}:{region}:{resource_type}")
}

/// A resource to price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource type.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name within the template.
    pub name: String,
    /// How many of this resource.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Provider override; empty uses the template default.
    #[serde(default)]
    pub provider: String,
    /// Region override; empty uses the template default.
    #[serde(default)]
    pub region: String,
}

fn default_count() -> u32 {
    1
}

impl ResourceSpec {
    /// Resource of `resource_type` using the template's provider and region.
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>, count: u32) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            count,
            provider: String::new(),
            region: String::new(),
        }
    }
}

/// Resources of one template with a shared provider and region default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateResources {
    /// Default provider.
    pub provider: String,
    /// Default region.
    pub region: String,
    /// Resources to price, in order.
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}

/// One line of a cost estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Resource type.
    pub resource_type: String,
    /// Resource name.
    pub resource_name: String,
    /// Resource count.
    pub count: u32,
    /// Whether pricing was found.
    pub available: bool,
    /// Hourly price of one unit.
    pub unit_hourly: f64,
    /// Monthly price of one unit as reported by the provider.
    pub unit_monthly: f64,
    /// `unit_hourly * count`.
    pub total_hourly: f64,
    /// `unit_monthly * count`.
    pub total_monthly: f64,
    /// Currency of the unit prices.
    pub currency: String,
}

/// Estimated running cost of a set of resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Sum of every breakdown's `total_hourly`.
    pub total_hourly_cost: f64,
    /// `total_hourly_cost * 720`.
    pub total_monthly_cost: f64,
    /// Currency of the totals.
    pub currency: String,
    /// One entry per resource, in input order.
    pub breakdown: Vec<CostBreakdown>,
    /// One message per resource without pricing.
    pub warnings: Vec<String>,
}
