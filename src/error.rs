use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Returns a user-friendly suggestion for how to resolve this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Auth(AuthError::MissingCredentials) => Some(
                "Set AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET, or run 'az login'",
            ),
            Error::Auth(AuthError::CliFailed(_)) => {
                Some("Run 'az login' to refresh the Azure CLI session")
            }
            Error::Auth(AuthError::TokenRequestFailed(_)) => {
                Some("Check the service principal credentials and tenant id")
            }
            Error::Timeout(_) => Some("Increase REQUEST_TIMEOUT or check connectivity to Azure"),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no Azure credentials available")]
    MissingCredentials,

    #[error("token request failed: {0}")]
    TokenRequestFailed(String),

    #[error("azure cli credential failed: {0}")]
    CliFailed(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed with error {status} {reason}")]
    UpstreamStatus { status: u16, reason: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("request body too large: {size} bytes (max: {max} bytes)")]
    RequestTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_contains_status_text() {
        let err = Error::Api(ApiError::UpstreamStatus {
            status: 403,
            reason: "Forbidden".to_string(),
        });
        let display = format!("{}", err);
        assert!(display.contains("403 Forbidden"));
        assert!(display.contains("request failed with error"));
    }

    #[test]
    fn test_error_suggestion_missing_credentials() {
        let err = Error::Auth(AuthError::MissingCredentials);
        assert!(err.suggestion().is_some());
        assert!(err.suggestion().unwrap().contains("az login"));
    }

    #[test]
    fn test_error_suggestion_timeout() {
        let err = Error::Timeout(Duration::from_secs(60));
        assert!(err.suggestion().unwrap().contains("REQUEST_TIMEOUT"));
    }

    #[test]
    fn test_error_no_suggestion() {
        let err = Error::Http("connection failed".to_string());
        assert!(err.suggestion().is_none());
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::InvalidRequest {
            message: "bad input".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("bad input"));
    }
}
