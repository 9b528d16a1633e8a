use serde::Deserialize;

/// A single entry from the ARM compute usage listing: how much of a resource
/// dimension is consumed against its limit in one location.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub name: UsageName,
    #[serde(rename = "currentValue", default)]
    pub current_value: i32,
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageName {
    #[serde(default)]
    pub value: String,
}

/// One page of the usage listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageListResult {
    #[serde(default)]
    pub value: Vec<Usage>,
    #[serde(rename = "nextLink", default)]
    pub next_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_page_deserializes() {
        let json = r#"{
            "value": [
                {
                    "name": {"value": "standardNCSv3Family", "localizedValue": "Standard NCSv3 Family vCPUs"},
                    "currentValue": 6,
                    "limit": 12,
                    "unit": "Count"
                }
            ],
            "nextLink": "https://management.azure.com/next?page=2"
        }"#;

        let page: UsageListResult = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 1);
        assert_eq!(page.value[0].name.value, "standardNCSv3Family");
        assert_eq!(page.value[0].current_value, 6);
        assert_eq!(page.value[0].limit, 12);
        assert!(page.next_link.is_some());
    }

    #[test]
    fn test_last_page_has_no_next_link() {
        let page: UsageListResult = serde_json::from_str(r#"{"value": []}"#).unwrap();
        assert!(page.value.is_empty());
        assert!(page.next_link.is_none());
    }
}
