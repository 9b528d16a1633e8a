use std::future::Future;
use tracing::{error, info};

use crate::compute::Usage;
use crate::config::QuotaConfig;
use crate::error::Result;
use crate::models::Gpu;

/// Fixed conversion factor between vCPU quota units and GPUs for the
/// configured machine family.
const VCPU_TO_GPU_FACTOR: i64 = 6;

/// Source of compute usage figures, abstracted for testing.
pub trait UsageSource {
    fn compute_usage(
        &self,
        location: &str,
        machine_type: &str,
    ) -> impl Future<Output = Result<Usage>> + Send;
}

/// Derives the available GPU count from the compute usage listing.
pub struct QuotaService<C> {
    config: QuotaConfig,
    usage_client: C,
}

impl<C: UsageSource> QuotaService<C> {
    pub fn new(config: QuotaConfig, usage_client: C) -> Self {
        Self {
            config,
            usage_client,
        }
    }

    /// Number of GPUs still available in the configured location:
    /// `(limit - currentValue) / 6`, integer division truncating toward zero.
    /// Usage client errors propagate unchanged.
    pub async fn available_gpu(&self) -> Result<Gpu> {
        let usage = self
            .usage_client
            .compute_usage(&self.config.location, &self.config.machine_type)
            .await
            .inspect_err(|e| {
                error!(
                    location = %self.config.location,
                    machine_type = %self.config.machine_type,
                    error = %e,
                    "Failed to fetch compute usage"
                );
            })?;

        info!(
            location = %self.config.location,
            machine_type = %self.config.machine_type,
            limit = usage.limit,
            current = usage.current_value,
            "Fetched compute usage"
        );

        let available = (usage.limit - i64::from(usage.current_value)) / VCPU_TO_GPU_FACTOR;

        Ok(Gpu(available))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::models::UsageName;
    use crate::error::Error;

    /// Test double returning a fixed usage, or an error when `usage` is None.
    struct StaticUsage {
        usage: Option<Usage>,
    }

    impl UsageSource for StaticUsage {
        async fn compute_usage(&self, _location: &str, _machine_type: &str) -> Result<Usage> {
            match &self.usage {
                Some(usage) => Ok(usage.clone()),
                None => Err(Error::Http("usage listing unavailable".to_string())),
            }
        }
    }

    fn service(usage: Option<Usage>) -> QuotaService<StaticUsage> {
        QuotaService::new(
            QuotaConfig {
                subscription_id: "sub".to_string(),
                location: "westeurope".to_string(),
                machine_type: "standardNCSv3Family".to_string(),
            },
            StaticUsage { usage },
        )
    }

    fn usage(current_value: i32, limit: i64) -> Usage {
        Usage {
            name: UsageName {
                value: "standardNCSv3Family".to_string(),
            },
            current_value,
            limit,
        }
    }

    #[tokio::test]
    async fn test_available_gpu() {
        let gpu = service(Some(usage(6, 12))).available_gpu().await.unwrap();
        assert_eq!(gpu, Gpu(1));
    }

    #[tokio::test]
    async fn test_available_gpu_truncates() {
        let gpu = service(Some(usage(0, 17))).available_gpu().await.unwrap();
        assert_eq!(gpu, Gpu(2));

        // truncation toward zero, matching integer division in the formula
        let gpu = service(Some(usage(10, 5))).available_gpu().await.unwrap();
        assert_eq!(gpu, Gpu(0));
    }

    #[tokio::test]
    async fn test_available_gpu_zero_usage() {
        let gpu = service(Some(Usage::default())).available_gpu().await.unwrap();
        assert_eq!(gpu, Gpu(0));
    }

    #[tokio::test]
    async fn test_usage_client_error_propagates() {
        let err = service(None).available_gpu().await.unwrap_err();
        assert!(err.to_string().contains("usage listing unavailable"));
    }
}
