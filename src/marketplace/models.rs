use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{UsageEventError, UsageEventResponse};

/// Usage event as posted to the marketplace metering API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceUsageEvent {
    pub dimension: String,
    pub quantity: f32,
    #[serde(rename = "effectiveStartTime")]
    pub effective_start_time: DateTime<Utc>,
    // unique identifier of the resource against which usage is emitted
    #[serde(rename = "resourceUri")]
    pub resource_uri: String,
    // id of the plan purchased for the offer
    #[serde(rename = "planId")]
    pub plan_id: String,
}

/// Batch request envelope. The marketplace API wraps events in `request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceUsageEventBatch {
    pub request: Vec<MarketplaceUsageEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketplaceUsageEventResponse {
    #[serde(rename = "usageEventId", default)]
    pub usage_event_id: String,
    // the only populated field for a single accepted event
    #[serde(default)]
    pub status: String,
    #[serde(rename = "messageTime", default)]
    pub message_time: Option<DateTime<Utc>>,
    #[serde(rename = "resourceId", default)]
    pub resource_id: String,
    #[serde(default)]
    pub quantity: f32,
    #[serde(default)]
    pub dimension: String,
    #[serde(rename = "effectiveStartTime", default)]
    pub effective_start_time: Option<DateTime<Utc>>,
    #[serde(rename = "planId", default)]
    pub plan_id: String,
    #[serde(default)]
    pub error: Option<MarketplaceErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketplaceErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub details: Vec<MarketplaceErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarketplaceBatchResponse {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub result: Vec<MarketplaceUsageEventResponse>,
}

impl From<MarketplaceUsageEventResponse> for UsageEventResponse {
    fn from(wire: MarketplaceUsageEventResponse) -> Self {
        UsageEventResponse {
            usage_event_id: wire.usage_event_id,
            dimension_id: wire.dimension,
            status: wire.status,
            message_time: wire.message_time,
            resource_id: wire.resource_id,
            quantity: wire.quantity,
            effective_start_time: wire.effective_start_time,
            plan_id: wire.plan_id,
            error: wire.error.map(Into::into),
        }
    }
}

impl From<MarketplaceErrorDetail> for UsageEventError {
    fn from(wire: MarketplaceErrorDetail) -> Self {
        UsageEventError {
            message: wire.message,
            target: wire.target,
            code: wire.code,
            details: wire.details.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_wire_event_field_names() {
        let event = MarketplaceUsageEvent {
            dimension: "gpu-hour".to_string(),
            quantity: 2.0,
            effective_start_time: Utc.with_ymd_and_hms(2023, 4, 5, 10, 0, 0).unwrap(),
            resource_uri: "/subscriptions/s/resourceGroups/rg".to_string(),
            plan_id: "gpu-plan".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"dimension\":\"gpu-hour\""));
        assert!(json.contains("\"effectiveStartTime\""));
        assert!(json.contains("\"resourceUri\""));
        assert!(json.contains("\"planId\""));
    }

    #[test]
    fn test_batch_request_envelope() {
        let batch = MarketplaceUsageEventBatch { request: vec![] };
        assert_eq!(serde_json::to_string(&batch).unwrap(), r#"{"request":[]}"#);
    }

    #[test]
    fn test_batch_response_maps_to_domain() {
        let json = r#"{
            "count": 2,
            "result": [
                {
                    "usageEventId": "11111111-1111-1111-1111-111111111111",
                    "status": "Accepted",
                    "messageTime": "2023-04-05T10:00:01Z",
                    "resourceId": "res-1",
                    "quantity": 2.0,
                    "dimension": "gpu-hour",
                    "effectiveStartTime": "2023-04-05T10:00:00Z",
                    "planId": "gpu-plan"
                },
                {
                    "status": "Expired",
                    "dimension": "gpu-hour",
                    "error": {
                        "message": "usage event is too old",
                        "target": "effectiveStartTime",
                        "code": "BadArgument",
                        "details": [
                            {"message": "more than 24h in the past", "target": "", "code": "BadArgument"}
                        ]
                    }
                }
            ]
        }"#;

        let wire: MarketplaceBatchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(wire.count, 2);

        let first: UsageEventResponse = wire.result[0].clone().into();
        assert_eq!(first.usage_event_id, "11111111-1111-1111-1111-111111111111");
        assert_eq!(first.dimension_id, "gpu-hour");
        assert_eq!(first.status, "Accepted");
        assert!(first.message_time.is_some());
        assert!(first.error.is_none());

        let second: UsageEventResponse = wire.result[1].clone().into();
        let error = second.error.expect("error detail should map");
        assert_eq!(error.code, "BadArgument");
        assert_eq!(error.details.len(), 1);
    }
}
