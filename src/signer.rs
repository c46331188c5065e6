use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::{form_urlencoded, Url};

use crate::canonical::encode_component;
use crate::error::{ParaError, Result};
use crate::time::{amz_date, amz_day};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-date";

/// Headers produced by signing a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub authorization: String,
    pub amz_date: String,
    pub content_sha256: String,
}

impl SignatureHeaders {
    /// Header name/value pairs to copy onto the outgoing request
    pub fn into_pairs(self) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), self.authorization),
            ("X-Amz-Date".to_string(), self.amz_date),
            ("X-Amz-Content-Sha256".to_string(), self.content_sha256),
        ]
    }
}

/// AWS Signature Version 4 signer scoped to one service and region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSigner {
    pub service: String,
    pub region: String,
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ParaError::RequestBuild(format!("invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the SigV4 signing key for a day (`YYYYMMDD`), region and service
pub fn signing_key(secret_key: &str, day: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret_key).as_bytes(), day.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

/// Sorted, SigV4-encoded form of a query string
fn canonical_query(query: Option<&str>) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .map(|(k, v)| (encode_component(&k), encode_component(&v)))
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Canonical URI: every segment of the (already escaped) path is encoded once
/// more, so `/dog/a%20b` is signed as `/dog/a%2520b`.
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(encode_component)
        .collect::<Vec<_>>()
        .join("/")
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| ParaError::RequestBuild(format!("URL has no host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

impl RequestSigner {
    /// Create a signer for the given service name and region
    pub fn new(service: impl Into<String>, region: impl Into<String>) -> Self {
        RequestSigner {
            service: service.into(),
            region: region.into(),
        }
    }

    /// Sign a request at the current time
    pub fn sign(
        &self,
        access_key: &str,
        secret_key: &str,
        method: &Method,
        url: &Url,
        body: &[u8],
    ) -> Result<SignatureHeaders> {
        self.sign_at(access_key, secret_key, method, url, body, Utc::now())
    }

    /// Sign a request as of `now`.
    ///
    /// `url` must carry the query exactly as it should be signed; the signed
    /// headers are `host` and `x-amz-date`.
    pub fn sign_at(
        &self,
        access_key: &str,
        secret_key: &str,
        method: &Method,
        url: &Url,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SignatureHeaders> {
        let date = amz_date(&now);
        let day = amz_day(&now);
        let payload_hash = format!("{:x}", Sha256::digest(body));

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\nx-amz-date:{}\n\n{}\n{}",
            method.as_str(),
            canonical_uri(url.path()),
            canonical_query(url.query()),
            host_header(url)?,
            date,
            SIGNED_HEADERS,
            payload_hash
        );

        let scope = format!("{}/{}/{}/aws4_request", day, self.region, self.service);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{:x}",
            ALGORITHM,
            date,
            scope,
            Sha256::digest(canonical_request.as_bytes())
        );

        let key = signing_key(secret_key, &day, &self.region, &self.service)?;
        let signature: String = hmac(&key, string_to_sign.as_bytes())?
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        Ok(SignatureHeaders {
            authorization: format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, access_key, scope, SIGNED_HEADERS, signature
            ),
            amz_date: date,
            content_sha256: payload_hash,
        })
    }
}
