//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use nearby_core::{refresh_skew, Coordinates, DEFAULT_LOCATION, DEFAULT_LOCATION_NAME};
use nearby_sync::{HttpTransportConfig, SessionConfig};

use crate::error::{ClientError, Result};

pub const ENV_BASE_URL: &str = "NEARBY_API_BASE_URL";
pub const ENV_API_PREFIX: &str = "NEARBY_API_PREFIX";
pub const ENV_CREDENTIALS_PATH: &str = "NEARBY_CREDENTIALS_PATH";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "NEARBY_REQUEST_TIMEOUT_SECS";

/// Configuration for [`crate::NearbyClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme, host and port of the API server.
    pub base_url: String,
    /// Path prefix of every endpoint.
    pub api_prefix: String,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// A session expiring within this window is refreshed before use.
    pub refresh_skew: chrono::Duration,
    /// How long to wait for a device position before falling back.
    pub location_timeout: Duration,
    /// Position used when the device cannot provide one.
    pub default_location: Coordinates,
    pub default_location_name: String,
    /// SQLite file for durable credentials. `None` keeps them in memory.
    pub credentials_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            api_prefix: "/api/v1".into(),
            request_timeout: Duration::from_secs(30),
            refresh_skew: refresh_skew(),
            location_timeout: Duration::from_secs(10),
            default_location: DEFAULT_LOCATION,
            default_location_name: DEFAULT_LOCATION_NAME.into(),
            credentials_path: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with the `NEARBY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for the `NEARBY_*`
    /// variable names. Empty values are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(base_url) = get(ENV_BASE_URL) {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(prefix) = get(ENV_API_PREFIX) {
            config.api_prefix = prefix;
        }
        if let Some(path) = get(ENV_CREDENTIALS_PATH) {
            config.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = get(ENV_REQUEST_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                ClientError::Config(format!("{ENV_REQUEST_TIMEOUT_SECS} must be whole seconds, got {secs:?}"))
            })?;
            if secs == 0 {
                return Err(ClientError::Config(format!(
                    "{ENV_REQUEST_TIMEOUT_SECS} must be positive"
                )));
            }
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn transport(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            base_url: self.base_url.clone(),
            api_prefix: self.api_prefix.clone(),
            timeout: self.request_timeout,
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            refresh_skew: self.refresh_skew,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.transport().base_url, "http://127.0.0.1:8080");
        assert_eq!(config.transport().api_prefix, "/api/v1");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.session().refresh_skew, chrono::Duration::minutes(5));
        assert_eq!(config.location_timeout, Duration::from_secs(10));
        assert_eq!(config.default_location, Coordinates::new(35.16, 112.68));
        assert!(config.credentials_path.is_none());
    }

    #[test]
    fn test_overlay() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://api.example.com/"),
            (ENV_CREDENTIALS_PATH, "/tmp/creds.db"),
            (ENV_REQUEST_TIMEOUT_SECS, "5"),
            (ENV_API_PREFIX, ""),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.api_prefix, "/api/v1");
        assert_eq!(config.credentials_path, Some(PathBuf::from("/tmp/creds.db")));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_bad_timeout() {
        let err = ClientConfig::from_lookup(lookup(&[(ENV_REQUEST_TIMEOUT_SECS, "soon")])).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
        assert!(ClientConfig::from_lookup(lookup(&[(ENV_REQUEST_TIMEOUT_SECS, "0")])).is_err());
    }
}
