//! Pricing service: cache, single-flight, rate limit, retry, fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redc_core::current_time_ms;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::cache::PricingCache;
use crate::cache::DEFAULT_TTL_MS;
use crate::credentials::CredentialProvider;
use crate::error::PricingError;
use crate::fallback::FallbackPricing;
use crate::rate_limiter::ProviderRateLimiters;
use crate::retry::retry_with_backoff;
use crate::retry::RetryConfig;
use crate::source::PricingSource;
use crate::types::pricing_key;
use crate::types::PricingData;
use crate::SUPPORTED_PROVIDERS;

/// Anything that can answer a pricing lookup.
#[async_trait]
pub trait PricingLookup: Send + Sync {
    /// Unit price of `resource_type` in `region` of `provider`.
    async fn get_pricing(
        &self,
        provider: &str,
        region: &str,
        resource_type: &str,
        cancel: &CancellationToken,
    ) -> Result<PricingData, PricingError>;
}

type Outcome = Result<PricingData, PricingError>;

/// Receiver side of a shared fetch; `None` until the fetch completes.
type InFlight = watch::Receiver<Option<Outcome>>;

/// Layered pricing lookups.
///
/// Concurrent lookups of the same key share one fetch. The first caller
/// spawns the fetch as a task owned by the service and parks a receiver in the
/// in-flight map; every caller waits on that receiver or its own cancel token.
/// The task removes the entry and publishes the result when the fetch ends,
/// so callers that give up neither abort the fetch nor leak an entry.
pub struct PricingService {
    fetcher: Fetcher,
    in_flight: Arc<DashMap<String, InFlight>>,
}

/// Everything a fetch needs, cloned into the spawned task.
#[derive(Clone)]
struct Fetcher {
    cache: Arc<PricingCache>,
    limiters: Arc<ProviderRateLimiters>,
    retry: RetryConfig,
    ttl_ms: u64,
    fallback: Option<Arc<dyn FallbackPricing>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    source: Option<Arc<dyn PricingSource>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for PricingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingService")
            .field("retry", &self.fetcher.retry)
            .field("ttl_ms", &self.fetcher.ttl_ms)
            .field("fallback", &self.fetcher.fallback.is_some())
            .field("credentials", &self.fetcher.credentials.is_some())
            .field("source", &self.fetcher.source.is_some())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl PricingService {
    /// Service over `cache` with default rate limits and retry schedule and
    /// no live source, credentials, or fallback.
    pub fn new(cache: Arc<PricingCache>) -> Self {
        Self {
            fetcher: Fetcher {
                cache,
                limiters: Arc::new(ProviderRateLimiters::with_defaults()),
                retry: RetryConfig::default(),
                ttl_ms: DEFAULT_TTL_MS,
                fallback: None,
                credentials: None,
                source: None,
                shutdown: CancellationToken::new(),
            },
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Use `fallback` when live pricing is unavailable.
    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackPricing>) -> Self {
        self.fetcher.fallback = Some(fallback);
        self
    }

    /// Use `credentials` for live calls.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.fetcher.credentials = Some(credentials);
        self
    }

    /// Use `source` for live calls.
    pub fn with_source(mut self, source: Arc<dyn PricingSource>) -> Self {
        self.fetcher.source = Some(source);
        self
    }

    /// Replace the per-provider rate limits.
    pub fn with_rate_limiters(mut self, limiters: ProviderRateLimiters) -> Self {
        self.fetcher.limiters = Arc::new(limiters);
        self
    }

    /// Replace the retry schedule.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.fetcher.retry = retry;
        self
    }

    /// Lifetime of rows written to the cache.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.fetcher.ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Token that aborts in-flight fetches when the service shuts down.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.fetcher.shutdown = shutdown;
        self
    }

    /// Underlying cache.
    pub fn cache(&self) -> &PricingCache {
        &self.fetcher.cache
    }

    /// Keys with a fetch in progress.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Look up pricing for one resource type.
    ///
    /// Returns [`PricingError::Canceled`] as soon as `cancel` fires, even if
    /// the shared fetch keeps running for other callers.
    pub async fn get_pricing(
        &self,
        provider: &str,
        region: &str,
        resource_type: &str,
        cancel: &CancellationToken,
    ) -> Result<PricingData, PricingError> {
        if let Some(hit) = self.fetcher.cached(provider, region, resource_type) {
            return Ok(hit);
        }

        let key = pricing_key(provider, region, resource_type);
        let mut receiver = self.join_or_spawn(key, provider, region, resource_type);

        tokio::select! {
            published = receiver.wait_for(Option::is_some) => match published {
                Ok(outcome) => outcome.clone().unwrap_or_else(|| Err(fetch_lost())),
                Err(_) => Err(fetch_lost()),
            },
            _ = cancel.cancelled() => Err(PricingError::Canceled),
        }
    }

    /// Receiver for the fetch of `key`, spawning the fetch if none is running.
    fn join_or_spawn(&self, key: String, provider: &str, region: &str, resource_type: &str) -> InFlight {
        let (sender, receiver) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => return existing.get().clone(),
            Entry::Vacant(slot) => {
                let (sender, receiver) = watch::channel(None);
                slot.insert(receiver.clone());
                (sender, receiver)
            }
        };

        debug!(provider, region, resource_type, "starting shared pricing fetch");
        let fetcher = self.fetcher.clone();
        let in_flight = self.in_flight.clone();
        let marker = receiver.clone();
        let (provider, region, resource_type) = (provider.to_string(), region.to_string(), resource_type.to_string());
        tokio::spawn(async move {
            let outcome = fetcher.fetch_and_cache(&provider, &region, &resource_type).await;
            // Unpublish before sending so a woken caller never sees a stale entry.
            in_flight.remove_if(&key, |_, current| current.same_channel(&marker));
            sender.send_replace(Some(outcome));
        });
        receiver
    }

    /// Periodically delete expired cache rows until `cancel` fires.
    pub fn spawn_cache_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.fetcher.cache.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancel.cancelled() => break,
                }
                match cache.sweep_expired(current_time_ms()) {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "swept expired pricing cache rows"),
                    Err(err) => warn!(error = %err, "pricing cache sweep failed"),
                }
            }
            debug!("pricing cache sweeper stopped");
        })
    }
}

fn fetch_lost() -> PricingError {
    PricingError::NonRetryable {
        message: "pricing fetch ended without a result".to_string(),
    }
}

impl Fetcher {
    fn cached(&self, provider: &str, region: &str, resource_type: &str) -> Option<PricingData> {
        match self.cache.get(provider, region, resource_type, current_time_ms()) {
            Ok(Some(hit)) => {
                debug!(provider, region, resource_type, "pricing cache hit");
                Some(hit)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(provider, region, resource_type, error = %err, "pricing cache lookup failed");
                None
            }
        }
    }

    fn store(&self, data: &PricingData) {
        if let Err(err) = self.cache.put(data, current_time_ms(), self.ttl_ms) {
            warn!(key = %data.key(), error = %err, "failed to cache pricing data");
        }
    }

    async fn fetch_and_cache(&self, provider: &str, region: &str, resource_type: &str) -> Outcome {
        // Another fetch may have finished between our cache miss and taking the slot.
        if let Some(hit) = self.cached(provider, region, resource_type) {
            return Ok(hit);
        }

        if let (Some(fallback), None) = (&self.fallback, &self.credentials) {
            let data = fallback.lookup(provider, region, resource_type).await.map_err(|err| match err {
                PricingError::Fallback { .. } => err,
                other => PricingError::Fallback {
                    message: other.to_string(),
                },
            })?;
            self.store(&data);
            return Ok(data);
        }

        let operation = format!("fetch_pricing({provider}, {region}, {resource_type})");
        let live = retry_with_backoff(&self.retry, &self.shutdown, &operation, || {
            self.fetch_live(provider, region, resource_type)
        })
        .await;

        match live {
            Ok(data) => {
                self.store(&data);
                Ok(data)
            }
            Err(err) if err.is_canceled() => Err(err),
            Err(err) => {
                if let Some(fallback) = &self.fallback {
                    match fallback.lookup(provider, region, resource_type).await {
                        Ok(data) => {
                            info!(provider, region, resource_type, live_error = %err, "using fallback pricing");
                            self.store(&data);
                            return Ok(data);
                        }
                        Err(fallback_err) => {
                            warn!(provider, region, resource_type, error = %fallback_err, "fallback pricing also failed");
                        }
                    }
                }
                Err(err)
            }
        }
    }

    async fn fetch_live(&self, provider: &str, region: &str, resource_type: &str) -> Outcome {
        if !SUPPORTED_PROVIDERS.contains(&provider) {
            return Err(PricingError::UnsupportedProvider {
                provider: provider.to_string(),
            });
        }

        self.limiters.wait(provider, &self.shutdown).await?;

        let credentials = match &self.credentials {
            Some(credentials) => credentials.credentials(provider)?,
            None => {
                return Err(PricingError::MissingCredentials {
                    provider: provider.to_string(),
                    message: "no credential provider configured".to_string(),
                })
            }
        };
        let region = if region.is_empty() {
            credentials.default_region.as_str()
        } else {
            region
        };

        let source = self.source.as_ref().ok_or_else(|| PricingError::NonRetryable {
            message: "no live pricing source configured".to_string(),
        })?;
        source.fetch(provider, region, resource_type, &credentials, &self.shutdown).await
    }
}

#[async_trait]
impl PricingLookup for PricingService {
    async fn get_pricing(
        &self,
        provider: &str,
        region: &str,
        resource_type: &str,
        cancel: &CancellationToken,
    ) -> Result<PricingData, PricingError> {
        PricingService::get_pricing(self, provider, region, resource_type, cancel).await
    }
}
