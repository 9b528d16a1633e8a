use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;

use super::HttpClient;
use super::token::{cli_token, request_token, unix_now};

/// ARM resource for the compute usage listing.
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// Application id of the Azure Marketplace metering API.
pub const MARKETPLACE_RESOURCE: &str = "20e940b3-4c77-4b0b-9a53-9e16a1b010a7";

/// Refresh tokens this many seconds before they expire.
const REFRESH_LEEWAY_SECS: u64 = 300;

/// Where tokens come from, resolved once at startup.
enum CredentialSource {
    /// Client-credentials flow with a service principal from the environment.
    Environment {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
    /// `az account get-access-token` from the ambient CLI session.
    Cli,
}

/// Minimal default credential chain: environment service principal first,
/// Azure CLI second. Tokens are cached per resource and refreshed near expiry.
pub struct AzureCredential {
    http_client: HttpClient,
    source: CredentialSource,
    cache: Mutex<HashMap<String, CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: u64,
}

impl AzureCredential {
    /// Resolve the credential source from the ambient environment.
    pub fn from_environment() -> Self {
        let tenant_id = std::env::var("AZURE_TENANT_ID").ok();
        let client_id = std::env::var("AZURE_CLIENT_ID").ok();
        let client_secret = std::env::var("AZURE_CLIENT_SECRET").ok();

        let source = match (tenant_id, client_id, client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret))
                if !tenant_id.is_empty() && !client_id.is_empty() && !client_secret.is_empty() =>
            {
                info!(client_id = %client_id, "Using environment credential");
                CredentialSource::Environment {
                    tenant_id,
                    client_id,
                    client_secret,
                }
            }
            _ => {
                info!("No service principal in environment, falling back to Azure CLI");
                CredentialSource::Cli
            }
        };

        Self {
            http_client: HttpClient::new(),
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get a bearer token for the given resource, from cache when still fresh.
    pub async fn access_token(&self, resource: &str) -> Result<String> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.get(resource)
            && cached.expires_at.saturating_sub(unix_now()) > REFRESH_LEEWAY_SECS
        {
            return Ok(cached.token.clone());
        }

        let (token, expires_at) = match &self.source {
            CredentialSource::Environment {
                tenant_id,
                client_id,
                client_secret,
            } => {
                let scope = scope_for(resource);
                debug!(scope = %scope, "Requesting token from Microsoft Entra");
                let (token, expires_in) = request_token(
                    &self.http_client,
                    tenant_id,
                    client_id,
                    client_secret,
                    &scope,
                )
                .await?;
                (token, unix_now() + expires_in)
            }
            CredentialSource::Cli => {
                debug!(resource = %resource, "Requesting token from Azure CLI");
                cli_token(resource).await?
            }
        };

        cache.insert(
            resource.to_string(),
            CachedToken {
                token: token.clone(),
                expires_at,
            },
        );

        Ok(token)
    }
}

fn scope_for(resource: &str) -> String {
    format!("{}/.default", resource.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_for_url_resource() {
        assert_eq!(
            scope_for(MANAGEMENT_RESOURCE),
            "https://management.azure.com/.default"
        );
    }

    #[test]
    fn test_scope_for_app_id_resource() {
        assert_eq!(
            scope_for(MARKETPLACE_RESOURCE),
            "20e940b3-4c77-4b0b-9a53-9e16a1b010a7/.default"
        );
    }
}
