use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use serde::Deserialize;
use std::fmt;

use crate::time::seconds_to_millis;

/// A bearer token (JWT) with its expiry metadata in epoch milliseconds.
///
/// The timestamps are unset when the token was assigned directly and its
/// claims could not be decoded. Such a token is never refreshed automatically.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    /// Raw token sent in the `Authorization: Bearer` header
    pub value: String,
    /// When the server stops accepting the token
    pub expires_at: Option<i64>,
    /// When the client should exchange the token for a new one
    pub next_refresh_at: Option<i64>,
}

// Keep the token itself out of logs
impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("next_refresh_at", &self.next_refresh_at)
            .finish()
    }
}

/// Claims read from the JWT payload segment; both are NumericDates (seconds).
#[derive(Debug, Deserialize)]
struct Claims {
    exp: i64,
    #[serde(default)]
    refresh: Option<i64>,
}

/// Decode `exp` and the optional `refresh` claim of a JWT, in milliseconds.
fn decode_claims(token: &str) -> Option<(i64, Option<i64>)> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .or_else(|_| STANDARD.decode(payload))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;

    let expires_at = seconds_to_millis(claims.exp)?;
    let next_refresh_at = match claims.refresh {
        Some(refresh) => Some(seconds_to_millis(refresh)?),
        None => None,
    };
    Some((expires_at, next_refresh_at))
}

/// Zero-or-one bearer token held by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState(Option<BearerToken>);

impl TokenState {
    /// Empty token state
    pub fn new() -> Self {
        TokenState(None)
    }

    /// Store a token with known expiry metadata
    pub fn set(&mut self, value: String, expires_at: i64, next_refresh_at: i64) {
        self.0 = Some(BearerToken {
            value,
            expires_at: Some(expires_at),
            next_refresh_at: Some(next_refresh_at),
        });
    }

    /// Store a raw JWT, decoding its `exp`/`refresh` claims.
    ///
    /// When the claims cannot be decoded only the value is kept and the token
    /// will be sent as-is until cleared. An empty string clears the state.
    pub fn set_encoded(&mut self, token: &str) {
        if token.is_empty() {
            self.clear();
            return;
        }

        let (expires_at, next_refresh_at) = match decode_claims(token) {
            Some((exp, refresh)) => (Some(exp), refresh),
            None => {
                tracing::debug!("access token claims not decodable, auto-refresh disabled");
                (None, None)
            }
        };

        self.0 = Some(BearerToken {
            value: token.to_string(),
            expires_at,
            next_refresh_at,
        });
    }

    /// Drop the token and all of its metadata
    pub fn clear(&mut self) {
        self.0 = None;
    }

    /// The current token, if any
    pub fn token(&self) -> Option<&BearerToken> {
        self.0.as_ref()
    }

    /// The raw token value, if any
    pub fn value(&self) -> Option<&str> {
        self.0.as_ref().map(|t| t.value.as_str())
    }

    /// A token is set (expired or not)
    pub fn is_usable(&self, _now: i64) -> bool {
        self.0.is_some()
    }

    /// Expiry is known and has passed
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.0, Some(BearerToken { expires_at: Some(exp), .. }) if now >= exp)
    }

    /// The token should be exchanged before use.
    ///
    /// A refresh timestamp later than the expiry is treated as due so that bad
    /// server data leads to an early refresh instead of a silent expiry.
    pub fn is_refresh_due(&self, now: i64) -> bool {
        match self.0 {
            Some(BearerToken {
                expires_at: Some(exp),
                next_refresh_at: Some(next),
                ..
            }) => now < exp && (now >= next || next > exp),
            _ => false,
        }
    }
}
