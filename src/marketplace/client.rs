use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::auth::{AzureCredential, MARKETPLACE_RESOURCE};
use crate::config::MeteringConfig;
use crate::error::{ApiError, Error, Result};
use crate::models::{UsageEvent, UsageEventBatch, UsageEventBatchResponse, UsageEventResponse};

use super::models::{
    MarketplaceBatchResponse, MarketplaceUsageEvent, MarketplaceUsageEventBatch,
    MarketplaceUsageEventResponse,
};

pub const BASE_URI: &str = "https://marketplaceapi.microsoft.com/api";
pub const API_VERSION: &str = "2018-08-31";

const USAGE_EVENT_PATH: &str = "usageEvent";
const BATCH_USAGE_EVENT_PATH: &str = "batchUsageEvent";

/// Client for the Azure Marketplace metering API.
///
/// Translates domain usage events into marketplace wire events, stamping the
/// configured resource URI and plan id on each one. Events with non-positive
/// quantity are never sent upstream.
pub struct MarketplaceClient {
    client: Client<
        hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
        Full<Bytes>,
    >,
    credential: Arc<AzureCredential>,
    config: MeteringConfig,
}

impl MarketplaceClient {
    pub fn new(credential: Arc<AzureCredential>, config: MeteringConfig) -> Self {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_only()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            credential,
            config,
        }
    }

    /// Report a single usage event to the marketplace.
    ///
    /// A non-positive quantity yields an empty success response without any
    /// upstream call.
    pub async fn create_usage_event(&self, event: UsageEvent) -> Result<UsageEventResponse> {
        if event.quantity <= 0.0 {
            info!(
                dimension = %event.dimension_id,
                quantity = event.quantity,
                start_at = %event.start_at,
                "Skipping usage event with non-positive quantity"
            );
            return Ok(UsageEventResponse::default());
        }

        let wire_event = self.to_wire(&event);
        debug!(dimension = %wire_event.dimension, "Sending usage event");

        let body = serde_json::to_vec(&wire_event)?;
        let response_bytes = self.post(USAGE_EVENT_PATH, body).await?;

        let wire_response: MarketplaceUsageEventResponse =
            serde_json::from_slice(&response_bytes)?;

        Ok(wire_response.into())
    }

    /// Report a batch of usage events to the marketplace.
    ///
    /// Events with non-positive quantity are omitted from the outgoing batch;
    /// the order of surviving events is preserved. Per-event errors in the
    /// marketplace response are logged but do not fail the call.
    pub async fn create_usage_event_batch(
        &self,
        batch: UsageEventBatch,
    ) -> Result<UsageEventBatchResponse> {
        let events = self.billable_events(&batch.events);
        debug!(
            submitted = batch.events.len(),
            billable = events.len(),
            "Sending usage event batch"
        );

        let body = serde_json::to_vec(&MarketplaceUsageEventBatch { request: events })?;
        let response_bytes = self.post(BATCH_USAGE_EVENT_PATH, body).await?;

        let wire_response: MarketplaceBatchResponse = serde_json::from_slice(&response_bytes)?;

        let mut result = Vec::with_capacity(wire_response.result.len());
        for event_response in wire_response.result {
            if let Some(detail) = &event_response.error {
                error!(
                    dimension = %event_response.dimension,
                    status = %event_response.status,
                    code = %detail.code,
                    message = %detail.message,
                    details = ?detail.details,
                    "Marketplace rejected a batch event"
                );
            }
            result.push(event_response.into());
        }

        Ok(UsageEventBatchResponse {
            count: wire_response.count,
            result,
        })
    }

    fn to_wire(&self, event: &UsageEvent) -> MarketplaceUsageEvent {
        MarketplaceUsageEvent {
            dimension: event.dimension_id.clone(),
            quantity: event.quantity,
            effective_start_time: event.start_at,
            resource_uri: self.config.resource_uri.clone(),
            plan_id: self.config.plan_id.clone(),
        }
    }

    fn billable_events(&self, events: &[UsageEvent]) -> Vec<MarketplaceUsageEvent> {
        events
            .iter()
            .filter(|event| {
                if event.quantity <= 0.0 {
                    info!(
                        dimension = %event.dimension_id,
                        quantity = event.quantity,
                        start_at = %event.start_at,
                        "Skipping batch event with non-positive quantity"
                    );
                    return false;
                }
                true
            })
            .map(|event| self.to_wire(event))
            .collect()
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<Bytes> {
        let token = self.credential.access_token(MARKETPLACE_RESOURCE).await?;
        let url = format!("{}/{}?api-version={}", BASE_URI, path, API_VERSION);

        let req = Request::builder()
            .method("POST")
            .uri(&url)
            .header("Authorization", format!("Bearer {}", token))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| Error::Http(e.to_string()))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
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
        Ok(body.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn test_client() -> MarketplaceClient {
        MarketplaceClient::new(
            Arc::new(AzureCredential::from_environment()),
            MeteringConfig {
                resource_uri: "/subscriptions/s/resourceGroups/rg".to_string(),
                plan_id: "gpu-plan".to_string(),
            },
        )
    }

    fn event(dimension: &str, quantity: f32) -> UsageEvent {
        UsageEvent {
            dimension_id: dimension.to_string(),
            quantity,
            start_at: Utc.with_ymd_and_hms(2023, 4, 5, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_billable_events_skips_non_positive_quantities() {
        let client = test_client();
        let events = vec![
            event("a", 1.0),
            event("b", 0.0),
            event("c", -2.5),
            event("d", 0.5),
        ];

        let billable = client.billable_events(&events);
        assert_eq!(billable.len(), 2);
        assert_eq!(billable[0].dimension, "a");
        assert_eq!(billable[1].dimension, "d");
    }

    #[test]
    fn test_billable_events_preserve_order() {
        let client = test_client();
        let events: Vec<UsageEvent> = (0..10)
            .map(|i| event(&format!("dim-{}", i), i as f32 + 1.0))
            .collect();

        let billable = client.billable_events(&events);
        let dimensions: Vec<&str> = billable.iter().map(|e| e.dimension.as_str()).collect();
        assert_eq!(
            dimensions,
            (0..10).map(|i| format!("dim-{}", i)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_wire_event_stamped_from_config() {
        let client = test_client();
        let wire = client.to_wire(&event("gpu-hour", 3.0));
        assert_eq!(wire.resource_uri, "/subscriptions/s/resourceGroups/rg");
        assert_eq!(wire.plan_id, "gpu-plan");
        assert_eq!(wire.dimension, "gpu-hour");
        assert_eq!(wire.quantity, 3.0);
    }

    #[tokio::test]
    async fn test_single_skipped_event_returns_empty_response() {
        let client = test_client();
        let response = client.create_usage_event(event("gpu-hour", 0.0)).await;

        // No upstream call happens for a skipped event
        let response = response.unwrap();
        assert_eq!(response.usage_event_id, "");
        assert_eq!(response.status, "");
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_single_negative_quantity_also_skipped() {
        let client = test_client();
        let response = client.create_usage_event(event("gpu-hour", -1.0)).await;
        assert!(response.is_ok());
    }
}
