use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A billable usage record as submitted by the internal platform.
///
/// The marketplace resource URI and plan id are deliberately absent: they
/// are stamped from configuration so callers cannot emit usage against
/// arbitrary resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    #[serde(rename = "dimensionID")]
    pub dimension_id: String,
    /// Units consumed. Must be greater than zero to be emitted upstream.
    pub quantity: f32,
    /// Time in UTC when the usage occurred.
    #[serde(rename = "startAt")]
    pub start_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEventBatch {
    pub events: Vec<UsageEvent>,
}

/// Marketplace acknowledgement of a single usage event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageEventResponse {
    #[serde(rename = "usageEventID", default)]
    pub usage_event_id: String,
    #[serde(rename = "dimensionID", default)]
    pub dimension_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "messageTime", default, skip_serializing_if = "Option::is_none")]
    pub message_time: Option<DateTime<Utc>>,
    #[serde(rename = "resourceID", default)]
    pub resource_id: String,
    #[serde(default)]
    pub quantity: f32,
    #[serde(
        rename = "effectiveStartTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub effective_start_time: Option<DateTime<Utc>>,
    #[serde(rename = "planID", default)]
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UsageEventError>,
}

/// Per-event error detail reported by the marketplace, possibly nested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageEventError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<UsageEventError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageEventBatchResponse {
    pub count: usize,
    pub result: Vec<UsageEventResponse>,
}

/// Number of GPUs available for the configured machine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gpu(pub i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_event_field_names() {
        let json = r#"{"dimensionID":"gpu-hour","quantity":1.5,"startAt":"2023-04-05T10:00:00Z"}"#;
        let event: UsageEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.dimension_id, "gpu-hour");
        assert_eq!(event.quantity, 1.5);

        let round = serde_json::to_string(&event).unwrap();
        assert!(round.contains("\"dimensionID\""));
        assert!(round.contains("\"startAt\""));
    }

    #[test]
    fn test_empty_response_serializes_without_optionals() {
        let response = UsageEventResponse::default();
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"usageEventID\":\"\""));
        assert!(!json.contains("messageTime"));
        assert!(!json.contains("effectiveStartTime"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_gpu_serializes_as_bare_number() {
        assert_eq!(serde_json::to_string(&Gpu(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Gpu(-1)).unwrap(), "-1");
    }
}
