use reqwest::blocking::{Client, ClientBuilder};
use std::time::Duration;

use crate::error::Result;

/// Default Para endpoint
pub const DEFAULT_ENDPOINT: &str = "https://paraio.com";
/// Default API path prefix
pub const DEFAULT_PATH: &str = "/v1/";
/// Path of the JWT sign-in / refresh / revoke resource
pub const JWT_PATH: &str = "/jwt_auth";

/// Create the HTTP client for API requests
/// with pooled connections and the configured timeouts
pub fn create_http_client(config: &Config) -> Result<Client> {
    Ok(ClientBuilder::new()
        .pool_max_idle_per_host(50)
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .build()?)
}

/// Configuration for a Para client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server endpoint, e.g. `https://paraio.com`
    pub endpoint: String,
    /// API path prefix, always ending with `/`
    pub api_path: String,
    /// SigV4 region
    pub region: String,
    /// SigV4 service name
    pub service: String,
    /// Total request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_path: DEFAULT_PATH.to_string(),
            region: "us-east-1".to_string(),
            service: "para".to_string(),
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Create a configuration pointing at the given endpoint
    pub fn new(endpoint: &str) -> Self {
        Config::default().with_endpoint(endpoint)
    }

    /// Set the endpoint; a blank value restores the default
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = if endpoint.trim().is_empty() {
            DEFAULT_ENDPOINT.to_string()
        } else {
            endpoint.trim_end_matches('/').to_string()
        };
        self
    }

    /// Set the API path prefix; a trailing `/` is added when missing
    pub fn with_api_path(mut self, path: &str) -> Self {
        self.api_path = normalize_api_path(path);
        self
    }

    /// Set the SigV4 region
    pub fn with_region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    /// Set the request timeouts
    pub fn with_timeouts(mut self, timeout: Duration, connect_timeout: Duration) -> Self {
        self.timeout = timeout;
        self.connect_timeout = connect_timeout;
        self
    }

    /// Full path for an API resource, e.g. `"users"` -> `"/v1/users"`.
    ///
    /// The JWT path is not an API resource and is returned unchanged.
    pub fn full_path(&self, resource: &str) -> String {
        if resource.starts_with(JWT_PATH) {
            return resource.to_string();
        }
        let resource = resource.strip_prefix('/').unwrap_or(resource);
        format!("{}{}", self.api_path, resource)
    }
}

fn normalize_api_path(path: &str) -> String {
    if path.is_empty() {
        DEFAULT_PATH.to_string()
    } else if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}
