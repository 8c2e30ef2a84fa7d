//! Cost estimates over a real pricing service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use redc_cost::fallback::FallbackFn;
use redc_cost::CostCalculator;
use redc_cost::PricingCache;
use redc_cost::PricingData;
use redc_cost::PricingError;
use redc_cost::PricingLookup;
use redc_cost::PricingService;
use redc_cost::ResourceSpec;
use redc_cost::TemplateResources;
use tokio_util::sync::CancellationToken;

fn service_with_prices(prices: &'static [(&'static str, f64)]) -> PricingService {
    let table: HashMap<&'static str, f64> = prices.iter().copied().collect();
    PricingService::new(Arc::new(PricingCache::open_in_memory().unwrap())).with_fallback(Arc::new(FallbackFn(
        move |provider: &str, region: &str, resource_type: &str| match table.get(resource_type) {
            Some(price) => Ok(PricingData::hourly(provider, region, resource_type, "USD", *price)),
            None => Err(PricingError::Fallback {
                message: format!("resource type {resource_type} not found"),
            }),
        },
    )))
}

fn aws(resources: Vec<ResourceSpec>) -> TemplateResources {
    TemplateResources {
        provider: "aws".into(),
        region: "us-east-1".into(),
        resources,
    }
}

#[tokio::test]
async fn test_three_instance_types() {
    let service = service_with_prices(&[("t2.micro", 0.5), ("t2.small", 1.0), ("t2.medium", 2.0)]);
    let template = aws(vec![
        ResourceSpec::new("t2.micro", "a", 1),
        ResourceSpec::new("t2.small", "b", 1),
        ResourceSpec::new("t2.medium", "c", 1),
    ]);

    let estimate = CostCalculator::new().calculate_cost(&template, &service, &CancellationToken::new()).await.unwrap();

    assert_eq!(estimate.total_hourly_cost, 3.5);
    assert_eq!(estimate.total_monthly_cost, 2520.0);
    assert_eq!(estimate.breakdown.len(), 3);
    assert!(estimate.breakdown.iter().all(|row| row.available));
    assert!(estimate.warnings.is_empty());
    assert_eq!(estimate.currency, "USD");
}

#[tokio::test]
async fn test_unpriced_resource_yields_one_warning() {
    let service = PricingService::new(Arc::new(PricingCache::open_in_memory().unwrap()));
    let template = aws(vec![ResourceSpec::new("unknown-type", "mystery", 1)]);

    let estimate = CostCalculator::new().calculate_cost(&template, &service, &CancellationToken::new()).await.unwrap();

    assert_eq!(estimate.total_hourly_cost, 0.0);
    assert_eq!(estimate.total_monthly_cost, 0.0);
    assert_eq!(estimate.breakdown.len(), 1);
    assert!(!estimate.breakdown[0].available);
    assert_eq!(estimate.breakdown[0].total_hourly, 0.0);
    assert_eq!(estimate.warnings.len(), 1);
    assert!(estimate.warnings[0].contains("mystery"));
}

#[tokio::test]
async fn test_mixed_availability() {
    let service = service_with_prices(&[("t2.micro", 0.5)]);
    let template = aws(vec![
        ResourceSpec::new("t2.micro", "web", 2),
        ResourceSpec::new("x9.mega", "gpu", 1),
    ]);

    let estimate = CostCalculator::new().calculate_cost(&template, &service, &CancellationToken::new()).await.unwrap();

    assert_eq!(estimate.total_hourly_cost, 1.0);
    assert_eq!(estimate.total_monthly_cost, 720.0);
    assert!(estimate.breakdown[0].available);
    assert!(!estimate.breakdown[1].available);
    assert_eq!(estimate.warnings.len(), 1);
}

#[tokio::test]
async fn test_unit_monthly_taken_from_provider() {
    struct Tiered;

    #[async_trait]
    impl PricingLookup for Tiered {
        async fn get_pricing(
            &self,
            provider: &str,
            region: &str,
            resource_type: &str,
            _cancel: &CancellationToken,
        ) -> Result<PricingData, PricingError> {
            let mut data = PricingData::hourly(provider, region, resource_type, "USD", 1.0);
            data.monthly_price = 650.0;
            Ok(data)
        }
    }

    let template = aws(vec![ResourceSpec::new("reserved.large", "db", 2)]);
    let estimate = CostCalculator::new().calculate_cost(&template, &Tiered, &CancellationToken::new()).await.unwrap();

    assert_eq!(estimate.breakdown[0].unit_monthly, 650.0);
    assert_eq!(estimate.breakdown[0].total_monthly, 1300.0);
    // totals are derived from the hourly sum
    assert_eq!(estimate.total_monthly_cost, 1440.0);
}

#[tokio::test]
async fn test_empty_resource_list() {
    let service = PricingService::new(Arc::new(PricingCache::open_in_memory().unwrap()));
    let estimate = CostCalculator::new().calculate_cost(&aws(Vec::new()), &service, &CancellationToken::new()).await.unwrap();

    assert_eq!(estimate.total_hourly_cost, 0.0);
    assert_eq!(estimate.total_monthly_cost, 0.0);
    assert!(estimate.breakdown.is_empty());
    assert!(estimate.warnings.is_empty());
}

struct PerType(HashMap<String, f64>);

#[async_trait]
impl PricingLookup for PerType {
    async fn get_pricing(
        &self,
        provider: &str,
        region: &str,
        resource_type: &str,
        _cancel: &CancellationToken,
    ) -> Result<PricingData, PricingError> {
        match self.0.get(resource_type) {
            Some(price) => Ok(PricingData::hourly(provider, region, resource_type, "USD", *price)),
            None => Err(PricingError::Fallback {
                message: "missing".into(),
            }),
        }
    }
}

fn arb_resources() -> impl Strategy<Value = Vec<(String, u32, Option<f64>)>> {
    prop::collection::vec(("[a-z]{1,6}\\.[a-z]{1,6}", 0u32..20, prop::option::of(0.0f64..50.0)), 0..12)
}

proptest! {
    #[test]
    fn test_totals_match_breakdown(resources in arb_resources()) {
        let mut prices = HashMap::new();
        let mut specs = Vec::new();
        for (i, (resource_type, count, price)) in resources.iter().enumerate() {
            // suffix keeps types unique so each row has its own price
            let resource_type = format!("{resource_type}{i}");
            if let Some(price) = price {
                prices.insert(resource_type.clone(), *price);
            }
            specs.push(ResourceSpec::new(resource_type, format!("r{i}"), *count));
        }

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let estimate = runtime
            .block_on(CostCalculator::new().calculate_cost(&aws(specs), &PerType(prices), &CancellationToken::new()))
            .unwrap();

        let summed = estimate.breakdown.iter().fold(0.0, |acc, row| acc + row.total_hourly);
        prop_assert_eq!(summed, estimate.total_hourly_cost);
        prop_assert_eq!(estimate.total_monthly_cost, estimate.total_hourly_cost * 720.0);
        let unavailable = estimate.breakdown.iter().filter(|row| !row.available).count();
        prop_assert_eq!(unavailable, estimate.warnings.len());
    }
}
