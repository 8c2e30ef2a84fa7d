//! Cost commands.
//!
//! Estimates run through the layered [`PricingService`]: cache, then live
//! gateway (when configured), then the fallback table.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Subcommand;
use redc_core::current_time_ms;
use redc_cost::CostCalculator;
use redc_cost::EnvCredentialProvider;
use redc_cost::FallbackTable;
use redc_cost::HttpPricingSource;
use redc_cost::PricingCache;
use redc_cost::PricingService;
use redc_cost::ResourceSpec;
use redc_cost::TemplateResources;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RedcConfig;
use crate::output::print_output;
use crate::output::SweepOutput;

/// Pricing and cost operations.
#[derive(Subcommand)]
pub enum CostCommand {
    /// Estimate the running cost of a set of resources.
    Estimate(EstimateArgs),

    /// Delete expired rows from the pricing cache.
    Sweep(SweepArgs),
}

#[derive(Args)]
pub struct EstimateArgs {
    /// Cloud provider (alicloud, tencentcloud, aws, volcengine).
    #[arg(long)]
    pub provider: String,

    /// Region.
    #[arg(long)]
    pub region: String,

    /// Resource as TYPE or TYPE:COUNT (repeatable).
    #[arg(long = "resource", required = true, value_parser = parse_resource)]
    pub resources: Vec<ResourceSpec>,
}

#[derive(Args)]
pub struct SweepArgs {
    /// Keep sweeping at the configured interval until interrupted.
    #[arg(long)]
    pub watch: bool,
}

/// Parse `TYPE[:COUNT]`.
fn parse_resource(raw: &str) -> std::result::Result<ResourceSpec, String> {
    let (resource_type, count) = match raw.rsplit_once(':') {
        Some((resource_type, count)) => {
            let count: u32 = count.parse().map_err(|_| format!("invalid count in '{raw}'"))?;
            (resource_type, count)
        }
        None => (raw, 1),
    };
    if resource_type.is_empty() {
        return Err(format!("missing resource type in '{raw}'"));
    }
    Ok(ResourceSpec::new(resource_type, resource_type, count))
}

impl CostCommand {
    /// Run the command.
    pub async fn run(self, config: &RedcConfig, json: bool, cancel: &CancellationToken) -> Result<()> {
        let cache_path = config.pricing_cache_path();
        let cache = Arc::new(
            PricingCache::open(&cache_path)
                .with_context(|| format!("failed to open pricing cache {}", cache_path.display()))?,
        );

        match self {
            CostCommand::Estimate(args) => {
                let service = pricing_service(config, cache, cancel)?;
                let template = TemplateResources {
                    provider: args.provider,
                    region: args.region,
                    resources: args.resources,
                };
                let estimate = CostCalculator::new().calculate_cost(&template, &service, cancel).await?;
                print_output(&estimate, json);
            }
            CostCommand::Sweep(args) if args.watch => {
                let interval = Duration::from_secs(config.pricing.sweep_interval_secs.max(1));
                info!(interval_secs = interval.as_secs(), "sweeping pricing cache until interrupted");
                let service = PricingService::new(cache);
                service.spawn_cache_sweeper(interval, cancel.clone()).await.context("cache sweeper failed")?;
            }
            CostCommand::Sweep(_) => {
                let removed = cache.sweep_expired(current_time_ms())?;
                let remaining = cache.row_count()?;
                print_output(&SweepOutput { removed, remaining }, json);
            }
        }
        Ok(())
    }
}

/// Without a gateway endpoint no credentials are configured, so lookups
/// go straight from the cache to the fallback table.
fn pricing_service(config: &RedcConfig, cache: Arc<PricingCache>, cancel: &CancellationToken) -> Result<PricingService> {
    let mut service = PricingService::new(cache).with_shutdown(cancel.clone());

    if let Some(endpoint) = &config.pricing.endpoint {
        let source = HttpPricingSource::new(endpoint).context("failed to build pricing client")?;
        service = service.with_source(Arc::new(source)).with_credentials(Arc::new(EnvCredentialProvider));
    }
    if let Some(path) = &config.pricing.fallback_path {
        let table = FallbackTable::load(path)?;
        info!(path = %path.display(), entries = table.len(), "loaded fallback pricing");
        service = service.with_fallback(Arc::new(table));
    }
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource() {
        let spec = parse_resource("ecs.g6.large:3").unwrap();
        assert_eq!(spec.resource_type, "ecs.g6.large");
        assert_eq!(spec.count, 3);

        assert_eq!(parse_resource("t3.micro").unwrap().count, 1);
        assert!(parse_resource("t3.micro:x").is_err());
        assert!(parse_resource(":2").is_err());
    }

    #[tokio::test]
    async fn test_offline_estimate_uses_fallback_table() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("fallback.json");
        std::fs::write(
            &fallback,
            r#"{
  "version": "1",
  "last_updated": "2024-01-01",
  "pricing": {
    "aws": {
      "us-east-1": {
        "c5.large": {
          "provider": "aws",
          "region": "us-east-1",
          "resource_type": "c5.large",
          "hourly_price": 0.25,
          "monthly_price": 180.0,
          "currency": "USD"
        }
      }
    }
  }
}"#,
        )
        .unwrap();

        let mut config = RedcConfig {
            home_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.pricing.fallback_path = Some(fallback);

        let cancel = CancellationToken::new();
        let cache = Arc::new(PricingCache::open_in_memory().unwrap());
        let service = pricing_service(&config, cache, &cancel).unwrap();
        let template = TemplateResources {
            provider: "aws".into(),
            region: "us-east-1".into(),
            resources: vec![parse_resource("c5.large:2").unwrap(), parse_resource("x1.mystery").unwrap()],
        };

        let estimate = CostCalculator::new().calculate_cost(&template, &service, &cancel).await.unwrap();
        assert_eq!(estimate.total_hourly_cost, 0.5);
        assert!(!estimate.breakdown[1].available);
        assert_eq!(estimate.warnings.len(), 1);
    }
}
