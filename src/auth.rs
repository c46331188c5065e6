//! Per-call choice of authentication scheme.
//!
//! Nothing about the scheme is remembered between calls: every request looks
//! at the credentials and token state as they are right now.

use reqwest::Method;
use std::fmt;

use crate::client::JWT_PATH;
use crate::error::{ParaError, Result};
use crate::token::TokenState;

/// Access/secret key pair identifying an app.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key: String,
    secret_key: Option<String>,
}

impl Credentials {
    /// Create credentials; a blank secret key is treated as absent
    pub fn new(access_key: impl Into<String>, secret_key: Option<String>) -> Self {
        Credentials {
            access_key: access_key.into(),
            secret_key: secret_key.filter(|s| !s.is_empty()),
        }
    }

    /// The public access key (app id)
    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// The secret key, if one was provided
    pub fn secret_key(&self) -> Option<&str> {
        self.secret_key.as_deref()
    }

    /// Replace the secret key
    pub fn rotate_secret_key(&mut self, secret_key: String) {
        self.secret_key = Some(secret_key).filter(|s| !s.is_empty());
    }
}

// Implement Debug manually to avoid exposing the secret key
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Mutable authentication state shared by every call of one client
#[derive(Debug, Clone)]
pub struct AuthState {
    pub credentials: Credentials,
    pub token: TokenState,
}

impl AuthState {
    pub fn new(credentials: Credentials) -> Self {
        AuthState {
            credentials,
            token: TokenState::new(),
        }
    }
}

/// How one outgoing call is authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// `Authorization: Anonymous <accessKey>`, no signature
    Anonymous,
    /// SigV4 signature with the access/secret key pair
    Signed,
    /// `Authorization: Bearer <token>`; `refresh` is false for the refresh call itself
    Bearer { refresh: bool },
}

/// Decide how a call to `path` with `method` is authenticated.
///
/// A bearer token wins over the key pair whenever one is set. The only call
/// that does not try to refresh the token first is `GET` on the JWT path,
/// which is the refresh call itself.
pub fn select_mode(state: &AuthState, method: &Method, path: &str) -> Result<AuthMode> {
    if state.credentials.access_key().is_empty() {
        return Err(ParaError::MissingAccessKey);
    }

    if state.token.value().is_some() {
        let is_refresh_call = *method == Method::GET && path == JWT_PATH;
        return Ok(AuthMode::Bearer {
            refresh: !is_refresh_call,
        });
    }

    if state.credentials.secret_key().is_none() {
        Ok(AuthMode::Anonymous)
    } else {
        Ok(AuthMode::Signed)
    }
}

/// Header value used by anonymous calls
pub fn anonymous_header(access_key: &str) -> String {
    format!("Anonymous {}", access_key)
}

/// Header value used by token-bearing calls
pub fn bearer_header(token: &str) -> String {
    format!("Bearer {}", token)
}
