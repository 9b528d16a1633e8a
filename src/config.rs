use std::time::Duration;

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    MissingVar {
        name: &'static str,
    },
    InvalidVar {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVar { name } => {
                write!(f, "Required environment variable {} is not set", name)
            }
            ConfigError::InvalidVar {
                name,
                value,
                expected,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for {}\n  Expected: {}",
                    value, name, expected
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

fn required(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar { name }),
    }
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Server configuration shared by both adapters.
///
/// `REQUEST_TIMEOUT` is an integer number of minutes applied to every
/// inbound request before the upstream Azure call is abandoned.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub log_level: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port_raw = required("PORT")?;
        let port: u16 = port_raw.parse().map_err(|_| ConfigError::InvalidVar {
            name: "PORT",
            value: port_raw,
            expected: "a port number (1-65535)",
        })?;

        let timeout_raw = required("REQUEST_TIMEOUT")?;
        let timeout_minutes: u64 = timeout_raw.parse().map_err(|_| ConfigError::InvalidVar {
            name: "REQUEST_TIMEOUT",
            value: timeout_raw,
            expected: "an integer number of minutes",
        })?;

        let log_level = optional("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            host,
            port,
            request_timeout: Duration::from_secs(timeout_minutes * 60),
            log_level,
        })
    }

    pub fn with_overrides(mut self, port: Option<u16>, host: Option<String>, debug: bool) -> Self {
        if let Some(p) = port {
            self.port = p;
        }
        if let Some(h) = host {
            self.host = h;
        }
        if debug {
            self.log_level = "debug".to_string();
        }
        self
    }
}

/// Configuration for the marketplace metering client.
///
/// The resource URI and plan id are stamped on every outgoing usage event;
/// callers never supply them.
#[derive(Debug, Clone)]
pub struct MeteringConfig {
    pub resource_uri: String,
    pub plan_id: String,
}

impl MeteringConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            resource_uri: required("MANAGED_APP_RESOURCE_URI")?,
            plan_id: required("MANAGED_APP_PLAN_ID")?,
        })
    }
}

/// Configuration for the compute quota adapter.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub subscription_id: String,
    pub location: String,
    pub machine_type: String,
}

impl QuotaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            subscription_id: required("AZURE_SUBSCRIPTION_ID")?,
            location: required("LOCATION")?,
            machine_type: required("MACHINE_TYPE")?,
        })
    }
}
