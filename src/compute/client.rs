use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{AzureCredential, MANAGEMENT_RESOURCE};
use crate::error::{ApiError, Error, Result};
use crate::quota::UsageSource;

use super::models::{Usage, UsageListResult};

pub const MANAGEMENT_BASE_URI: &str = "https://management.azure.com";
pub const API_VERSION: &str = "2021-07-01";

/// Client for the ARM compute usage listing.
pub struct ComputeUsageClient {
    client: Client<
        hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
        Empty<Bytes>,
    >,
    credential: Arc<AzureCredential>,
    subscription_id: String,
}

impl ComputeUsageClient {
    pub fn new(credential: Arc<AzureCredential>, subscription_id: String) -> Self {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_only()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            credential,
            subscription_id,
        }
    }

    async fn get_page(&self, url: &str) -> Result<UsageListResult> {
        let token = self.credential.access_token(MANAGEMENT_RESOURCE).await?;

        let req = Request::builder()
            .method("GET")
            .uri(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json")
            .body(Empty::new())
            .map_err(|e| Error::Http(e.to_string()))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::Api(ApiError::UpstreamStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            }));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(serde_json::from_slice(&body.to_bytes())?)
    }
}

impl UsageSource for ComputeUsageClient {
    /// Page through the usage listing for a location and return the first
    /// entry matching the machine type. No match yields a zero-valued usage.
    async fn compute_usage(&self, location: &str, machine_type: &str) -> Result<Usage> {
        let mut url = format!(
            "{}/subscriptions/{}/providers/Microsoft.Compute/locations/{}/usages?api-version={}",
            MANAGEMENT_BASE_URI, self.subscription_id, location, API_VERSION
        );

        loop {
            debug!(location = %location, "Fetching compute usage page");
            let page = self.get_page(&url).await?;

            if let Some(usage) = page
                .value
                .into_iter()
                .find(|usage| usage.name.value == machine_type)
            {
                return Ok(usage);
            }

            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        warn!(
            location = %location,
            machine_type = %machine_type,
            "No usage entry matched, reporting zero-valued usage"
        );
        Ok(Usage::default())
    }
}
