//! Client configuration

use crate::error::ConfigError;
use std::fmt;
use std::time::Duration;

/// Static access key pair
#[derive(Clone)]
pub struct Credentials {
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Object store connection settings
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Endpoint URL, e.g. `https://s3.us-east-1.amazonaws.com`
    pub endpoint: String,
    /// Signing region
    pub region: String,
    /// Credentials; requests are sent unsigned when absent
    pub credentials: Option<Credentials>,
    /// Request timeout; `None` leaves long part transfers to the transport
    pub timeout: Option<Duration>,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            credentials: None,
            timeout: None,
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("s3up/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl StoreConfig {
    /// Create a new config with the given endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the signing region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Endpoint without a trailing slash
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(self.base_url())
            .map_err(|e| ConfigError::Store(format!("endpoint {}: {}", self.endpoint, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Store(format!(
                "endpoint scheme must be http or https, got {}",
                url.scheme()
            )));
        }
        if url.path() != "/" && !url.path().is_empty() {
            return Err(ConfigError::Store(
                "endpoint must not contain a path".to_string(),
            ));
        }
        if self.region.is_empty() {
            return Err(ConfigError::Store("region must not be empty".to_string()));
        }
        Ok(())
    }
}
