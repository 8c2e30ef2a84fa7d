//! Live pricing sources.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::credentials::Credentials;
use crate::error::HttpClientSnafu;
use crate::error::PricingError;
use crate::types::PricingData;

/// Timeout for a single pricing request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One live pricing call. Rate limiting and retry happen in the caller.
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Fetch the price of `resource_type` in `region`.
    ///
    /// Errors should be [`PricingError::Transient`] unless the failure is
    /// known to be permanent.
    async fn fetch(
        &self,
        provider: &str,
        region: &str,
        resource_type: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<PricingData, PricingError>;
}

/// Pricing gateway reached over HTTP.
///
/// Requests `GET {endpoint}/v1/pricing/{provider}/{region}/{resource_type}`
/// with the access key pair in `X-Access-Key` / `X-Secret-Key` headers and
/// expects a JSON [`PricingData`] body.
#[derive(Debug, Clone)]
pub struct HttpPricingSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPricingSource {
    /// Client for the gateway at `endpoint`.
    pub fn new(endpoint: &str) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build().context(HttpClientSnafu)?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, provider: &str, region: &str, resource_type: &str) -> String {
        format!("{}/v1/pricing/{provider}/{region}/{resource_type}", self.endpoint)
    }

    async fn request(
        &self,
        provider: &str,
        region: &str,
        resource_type: &str,
        credentials: &Credentials,
    ) -> Result<PricingData, PricingError> {
        let response = self
            .client
            .get(self.url(provider, region, resource_type))
            .header("X-Access-Key", &credentials.access_key)
            .header("X-Secret-Key", &credentials.secret_key)
            .send()
            .await
            .map_err(|e| PricingError::Transient {
                message: format!("pricing request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body.trim()));
        }

        let mut data: PricingData = response.json().await.map_err(|e| PricingError::Transient {
            message: format!("invalid pricing response: {e}"),
        })?;
        if data.provider.is_empty() {
            data.provider = provider.to_string();
        }
        if data.region.is_empty() {
            data.region = region.to_string();
        }
        if data.resource_type.is_empty() {
            data.resource_type = resource_type.to_string();
        }
        Ok(data)
    }
}

/// Map an HTTP failure status onto the retry taxonomy.
fn classify_status(status: StatusCode, body: &str) -> PricingError {
    let message = format!("pricing gateway returned {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        PricingError::Transient { message }
    } else {
        PricingError::NonRetryable { message }
    }
}

#[async_trait]
impl PricingSource for HttpPricingSource {
    async fn fetch(
        &self,
        provider: &str,
        region: &str,
        resource_type: &str,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<PricingData, PricingError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PricingError::Canceled),
            result = self.request(provider, region, resource_type, credentials) => result,
        }
    }
}
