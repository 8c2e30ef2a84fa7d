//! Cost estimates for a template's resources.

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::error::PricingError;
use crate::service::PricingLookup;
use crate::types::CostBreakdown;
use crate::types::CostEstimate;
use crate::types::ResourceSpec;
use crate::types::TemplateResources;
use crate::verified::line_totals;
use crate::verified::monthly_from_hourly;

/// Currency reported when no resource was priced.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Aggregates per-resource prices into a [`CostEstimate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CostCalculator;

impl CostCalculator {
    /// New calculator.
    pub fn new() -> Self {
        Self
    }

    /// Price every resource in order.
    ///
    /// A resource whose lookup fails becomes an unavailable row with zero
    /// totals and one warning; it never fails the estimate. Only
    /// cancellation is returned as an error.
    pub async fn calculate_cost(
        &self,
        template: &TemplateResources,
        pricing: &dyn PricingLookup,
        cancel: &CancellationToken,
    ) -> Result<CostEstimate, PricingError> {
        let mut breakdown = Vec::with_capacity(template.resources.len());
        let mut warnings = Vec::new();
        let mut total_hourly = 0.0;
        let mut currency: Option<String> = None;

        for resource in &template.resources {
            let provider = non_empty_or(&resource.provider, &template.provider);
            let region = non_empty_or(&resource.region, &template.region);

            match pricing.get_pricing(provider, region, &resource.resource_type, cancel).await {
                Ok(price) => {
                    let (line_hourly, line_monthly) = line_totals(price.hourly_price, price.monthly_price, resource.count);
                    total_hourly += line_hourly;
                    if currency.is_none() && !price.currency.is_empty() {
                        currency = Some(price.currency.clone());
                    }
                    debug!(resource = %resource.name, resource_type = %resource.resource_type, line_hourly, "priced resource");
                    breakdown.push(CostBreakdown {
                        resource_type: resource.resource_type.clone(),
                        resource_name: resource.name.clone(),
                        count: resource.count,
                        available: true,
                        unit_hourly: price.hourly_price,
                        unit_monthly: price.monthly_price,
                        total_hourly: line_hourly,
                        total_monthly: line_monthly,
                        currency: price.currency,
                    });
                }
                Err(err) if err.is_canceled() => return Err(err),
                Err(err) => {
                    warn!(resource = %resource.name, resource_type = %resource.resource_type, error = %err, "pricing unavailable");
                    warnings.push(format!(
                        "pricing unavailable for {} ({}): {err}",
                        resource.name, resource.resource_type
                    ));
                    breakdown.push(unavailable(resource));
                }
            }
        }

        Ok(CostEstimate {
            total_hourly_cost: total_hourly,
            total_monthly_cost: monthly_from_hourly(total_hourly),
            currency: currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            breakdown,
            warnings,
        })
    }
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

fn unavailable(resource: &ResourceSpec) -> CostBreakdown {
    CostBreakdown {
        resource_type: resource.resource_type.clone(),
        resource_name: resource.name.clone(),
        count: resource.count,
        available: false,
        unit_hourly: 0.0,
        unit_monthly: 0.0,
        total_hourly: 0.0,
        total_monthly: 0.0,
        currency: String::new(),
    }
}
