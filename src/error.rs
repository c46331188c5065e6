use thiserror::Error;

/// Main error type for Para client operations
#[derive(Debug, Error)]
pub enum ParaError {
    /// The client has no access key, so no request can be authenticated.
    /// Raised locally before anything is sent.
    #[error("blank access key")]
    MissingAccessKey,

    /// Error status returned by the Para server
    #[error("API error {status}: {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// No response was received (network unreachable, timeout, ...)
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Request building error
    #[error("failed to build request: {0}")]
    RequestBuild(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl ParaError {
    /// Create a new API error from a status and the server's error body
    pub fn api(status: u16, body: &[u8], reason: Option<&str>) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
        let code = parsed
            .as_ref()
            .and_then(|v| v.get("code"))
            .and_then(|c| c.as_i64());
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| reason.map(str::to_string))
            .unwrap_or_else(|| "error".to_string());

        ParaError::Api {
            status,
            code,
            message,
        }
    }

    /// Check if this error is a permission denied error (403)
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ParaError::Api { status: 403, .. })
    }

    /// Check if the server rejected the credentials (401)
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ParaError::Api { status: 401, .. })
    }

    /// Get the HTTP status code if this is an API error
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ParaError::Api { status, .. } => Some(*status),
            ParaError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for Para client operations
pub type Result<T> = std::result::Result<T, ParaError>;
