use serde::Deserialize;

use crate::error::{AuthError, Error, Result};

pub const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Request an access token via the client-credentials grant.
/// Returns `(access_token, expires_in_seconds)`.
pub async fn request_token(
    http_client: &super::HttpClient,
    tenant_id: &str,
    client_id: &str,
    client_secret: &str,
    scope: &str,
) -> Result<(String, u64)> {
    let url = format!("{}/{}/oauth2/v2.0/token", AUTHORITY_HOST, tenant_id);

    let body = format!(
        "client_id={}&client_secret={}&scope={}&grant_type=client_credentials",
        percent_encode(client_id),
        percent_encode(client_secret),
        percent_encode(scope),
    );

    let response = http_client
        .post_form(&url, body.as_bytes())
        .await
        .map_err(|e| Error::Auth(AuthError::TokenRequestFailed(e)))?;

    #[derive(Deserialize)]
    struct TokenResponse {
        access_token: String,
        expires_in: u64,
    }

    let tokens: TokenResponse = serde_json::from_slice(&response)
        .map_err(|e| Error::Auth(AuthError::TokenRequestFailed(e.to_string())))?;

    Ok((tokens.access_token, tokens.expires_in))
}

/// Request an access token from the Azure CLI session.
/// Returns `(access_token, expires_at_unix_seconds)`.
pub async fn cli_token(resource: &str) -> Result<(String, u64)> {
    let resource = resource.to_string();
    let output = tokio::task::spawn_blocking(move || {
        std::process::Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                &resource,
                "--output",
                "json",
            ])
            .output()
    })
    .await
    .map_err(|e| Error::Auth(AuthError::CliFailed(e.to_string())))?
    .map_err(|e| {
        // No az binary on PATH means there is no credential source at all
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Auth(AuthError::MissingCredentials)
        } else {
            Error::Auth(AuthError::CliFailed(e.to_string()))
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Auth(AuthError::CliFailed(
            stderr.trim().to_string(),
        )));
    }

    #[derive(Deserialize)]
    struct CliTokenResponse {
        #[serde(rename = "accessToken")]
        access_token: String,
        // Unix timestamp, present on recent CLI versions
        #[serde(default)]
        expires_on: Option<u64>,
    }

    let tokens: CliTokenResponse = serde_json::from_slice(&output.stdout)
        .map_err(|e| Error::Auth(AuthError::CliFailed(e.to_string())))?;

    let expires_at = tokens.expires_on.unwrap_or_else(|| unix_now() + 3600);

    Ok((tokens.access_token, expires_at))
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percent_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 3);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push('%');
                result.push_str(&format!("{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_encode_passthrough() {
        assert_eq!(percent_encode("abc-123_XYZ.~"), "abc-123_XYZ.~");
    }

    #[test]
    fn test_percent_encode_reserved() {
        assert_eq!(
            percent_encode("https://management.azure.com/.default"),
            "https%3A%2F%2Fmanagement.azure.com%2F.default"
        );
        assert_eq!(percent_encode("a b+c"), "a%20b%2Bc");
    }
}
