//! Pricing service behavior across cache, single-flight, retry and fallback.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redc_cost::fallback::FallbackPricing;
use redc_cost::Credentials;
use redc_cost::PricingCache;
use redc_cost::PricingData;
use redc_cost::PricingError;
use redc_cost::PricingService;
use redc_cost::PricingSource;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("redc_cost=debug").with_test_writer().try_init();
}

fn in_memory_service() -> PricingService {
    PricingService::new(Arc::new(PricingCache::open_in_memory().unwrap()))
}

fn static_credentials(
    default_region: &'static str,
) -> Arc<dyn redc_cost::CredentialProvider> {
    Arc::new(move |_: &str| {
        Ok::<_, PricingError>(Credentials {
            access_key: "AKIA".into(),
            secret_key: "secret".into(),
            default_region: default_region.into(),
        })
    })
}

/// Fallback that counts invocations and takes a while to answer.
struct SlowCountingFallback {
    calls: AtomicU32,
    delay: Duration,
}

#[async_trait]
impl FallbackPricing for SlowCountingFallback {
    async fn lookup(&self, provider: &str, region: &str, resource_type: &str) -> Result<PricingData, PricingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(PricingData::hourly(provider, region, resource_type, "USD", 0.0116))
    }
}

/// Live source that fails a fixed number of times before answering.
struct ScriptedSource {
    calls: AtomicU32,
    failures: u32,
    failure: PricingError,
    regions: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn new(failures: u32, failure: PricingError) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
            failure,
            regions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PricingSource for ScriptedSource {
    async fn fetch(
        &self,
        provider: &str,
        region: &str,
        resource_type: &str,
        _credentials: &Credentials,
        _cancel: &CancellationToken,
    ) -> Result<PricingData, PricingError> {
        self.regions.lock().unwrap().push(region.to_string());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(self.failure.clone());
        }
        Ok(PricingData::hourly(provider, region, resource_type, "USD", 0.096))
    }
}

fn transient() -> PricingError {
    PricingError::Transient {
        message: "connection reset by peer".into(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_share_one_fetch() {
    init_tracing();
    let fallback = Arc::new(SlowCountingFallback {
        calls: AtomicU32::new(0),
        delay: Duration::from_millis(100),
    });
    let service = Arc::new(in_memory_service().with_fallback(fallback.clone()));
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let service = service.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            service.get_pricing("aws", "us-east-1", "t2.micro", &cancel).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(service.in_flight_len(), 0);
    assert_eq!(service.cache().row_count().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_live_fetch_retries_transient_errors() {
    init_tracing();
    let source = Arc::new(ScriptedSource::new(2, transient()));
    let service = in_memory_service().with_credentials(static_credentials("us-east-1")).with_source(source.clone());
    let cancel = CancellationToken::new();

    let data = service.get_pricing("aws", "us-east-1", "m5.large", &cancel).await.unwrap();
    assert_eq!(data.hourly_price, 0.096);
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);

    // served from cache
    service.get_pricing("aws", "us-east-1", "m5.large", &cancel).await.unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fall_back() {
    let source = Arc::new(ScriptedSource::new(u32::MAX, transient()));
    let fallback = Arc::new(SlowCountingFallback {
        calls: AtomicU32::new(0),
        delay: Duration::ZERO,
    });
    let service = in_memory_service()
        .with_credentials(static_credentials(""))
        .with_source(source.clone())
        .with_fallback(fallback.clone());

    let data = service.get_pricing("aws", "us-east-1", "t2.micro", &CancellationToken::new()).await.unwrap();
    assert_eq!(data.hourly_price, 0.0116);
    assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.cache().row_count().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_without_fallback_surface_error() {
    let source = Arc::new(ScriptedSource::new(u32::MAX, transient()));
    let service = in_memory_service().with_credentials(static_credentials("")).with_source(source.clone());

    let err = service.get_pricing("aws", "us-east-1", "t2.micro", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, PricingError::RetriesExhausted { retries: 3, .. }), "{err:?}");
    assert_eq!(service.cache().row_count().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_is_not_retried() {
    let source = Arc::new(ScriptedSource::new(
        u32::MAX,
        PricingError::Transient {
            message: "InvalidInstanceType.NotFound: t9.huge".into(),
        },
    ));
    let service = in_memory_service().with_credentials(static_credentials("")).with_source(source.clone());

    let err = service.get_pricing("aws", "us-east-1", "t9.huge", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, PricingError::NonRetryable { .. }), "{err:?}");
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_region_uses_credential_default() {
    let source = Arc::new(ScriptedSource::new(0, transient()));
    let service = in_memory_service().with_credentials(static_credentials("ap-southeast-1")).with_source(source.clone());

    let data = service.get_pricing("aws", "", "t3.small", &CancellationToken::new()).await.unwrap();
    assert_eq!(data.region, "ap-southeast-1");
    assert_eq!(source.regions.lock().unwrap().as_slice(), ["ap-southeast-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_canceled_caller_does_not_abort_shared_fetch() {
    let fallback = Arc::new(SlowCountingFallback {
        calls: AtomicU32::new(0),
        delay: Duration::from_secs(5),
    });
    let service = Arc::new(in_memory_service().with_fallback(fallback.clone()));

    let patient = {
        let service = service.clone();
        tokio::spawn(async move { service.get_pricing("aws", "us-east-1", "t2.micro", &CancellationToken::new()).await })
    };
    // let the patient caller start the fetch
    tokio::time::sleep(Duration::from_millis(10)).await;

    let impatient_cancel = CancellationToken::new();
    let impatient = {
        let service = service.clone();
        let cancel = impatient_cancel.clone();
        tokio::spawn(async move { service.get_pricing("aws", "us-east-1", "t2.micro", &cancel).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    impatient_cancel.cancel();

    assert_eq!(impatient.await.unwrap(), Err(PricingError::Canceled));
    assert_eq!(patient.await.unwrap().unwrap().hourly_price, 0.0116);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_first_caller_cancel_keeps_fetch_for_waiters() {
    let fallback = Arc::new(SlowCountingFallback {
        calls: AtomicU32::new(0),
        delay: Duration::from_secs(5),
    });
    let service = Arc::new(in_memory_service().with_fallback(fallback.clone()));

    let starter_cancel = CancellationToken::new();
    let starter = {
        let service = service.clone();
        let cancel = starter_cancel.clone();
        tokio::spawn(async move { service.get_pricing("aws", "us-east-1", "t2.micro", &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let waiter = {
        let service = service.clone();
        tokio::spawn(async move { service.get_pricing("aws", "us-east-1", "t2.micro", &CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    starter_cancel.cancel();

    assert_eq!(starter.await.unwrap(), Err(PricingError::Canceled));
    assert_eq!(waiter.await.unwrap().unwrap().hourly_price, 0.0116);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.in_flight_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_entry_removed_after_all_callers_cancel() {
    let fallback = Arc::new(SlowCountingFallback {
        calls: AtomicU32::new(0),
        delay: Duration::from_secs(5),
    });
    let service = Arc::new(in_memory_service().with_fallback(fallback.clone()));

    let cancel = CancellationToken::new();
    let caller = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.get_pricing("aws", "us-east-1", "t2.micro", &cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(service.in_flight_len(), 1);

    cancel.cancel();
    assert_eq!(caller.await.unwrap(), Err(PricingError::Canceled));

    // the orphaned fetch still completes, caches its result and unpublishes itself
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(service.in_flight_len(), 0);
    assert_eq!(service.cache().row_count().unwrap(), 1);

    let cached = service.get_pricing("aws", "us-east-1", "t2.micro", &CancellationToken::new()).await.unwrap();
    assert_eq!(cached.hourly_price, 0.0116);
    assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
}
