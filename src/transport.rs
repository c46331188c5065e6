use reqwest::blocking::Client;
use reqwest::Method;
use std::time::Instant;

use crate::client::{create_http_client, Config};
use crate::error::Result;
use crate::response::HttpResponse;

/// A fully authenticated request, ready to go on the wire.
///
/// `url` already carries the query string exactly as it must be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl PreparedRequest {
    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Executes prepared requests.
///
/// Implementations own connection handling, timeouts and cancellation. A
/// failure to obtain any response is reported as
/// [`ParaError::Transport`](crate::ParaError::Transport); every HTTP status,
/// including errors, is returned as an [`HttpResponse`].
pub trait Transport: Send + Sync {
    fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse>;
}

/// Blocking transport backed by a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport with the timeouts from `config`
    pub fn new(config: &Config) -> Result<Self> {
        Ok(ReqwestTransport {
            client: create_http_client(config)?,
        })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        ReqwestTransport { client }
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &PreparedRequest) -> Result<HttpResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(ref body) = request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body.clone());
        }

        let start = Instant::now();
        let response = builder.send().map_err(|e| {
            tracing::error!(method = %request.method, url = %request.url, error = %e, "request failed");
            e
        })?;
        let status = response.status();
        let body = response.bytes()?;

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status = status.as_u16(),
            elapsed = ?start.elapsed(),
            "request completed"
        );

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            body: body.to_vec(),
        })
    }
}
