//! Canonical query strings for request signing.
//!
//! The signature is computed over a normalized view of the query: one value per
//! key (the first one seen), every component encoded the way SigV4 expects. The
//! request actually transmitted keeps its original parameters, only with `+`
//! spaces rewritten to `%20` so that the bytes on the wire match what was signed.

use url::form_urlencoded;

/// Result of canonicalizing a raw query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalQuery {
    /// `key=value` pairs joined with `&`, first occurrence of each key only
    pub query: String,
    /// Set when a key appeared more than once in the input
    pub multi_valued: bool,
}

/// The two query strings derived from one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryViews {
    /// Query the signature is computed over
    pub signing: String,
    /// Query sent to the server
    pub transmit: String,
}

/// Percent-encode one query component with the SigV4 rules: everything but
/// `A-Z a-z 0-9 - _ . ~` is escaped and spaces become `%20`.
pub fn encode_component(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace('*', "%2A")
        .replace("%7E", "~")
}

/// Canonicalize a raw, form-encoded query string (no leading `?`).
///
/// Duplicate keys are not an error: the first value wins and the anomaly is
/// reported through [`CanonicalQuery::multi_valued`].
pub fn canonicalize(raw_query: &str) -> CanonicalQuery {
    let mut seen: Vec<String> = Vec::new();
    let mut pairs: Vec<String> = Vec::new();
    let mut multi_valued = false;

    for (key, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        if key.is_empty() {
            continue;
        }
        if seen.iter().any(|k| *k == key) {
            multi_valued = true;
            continue;
        }
        pairs.push(format!(
            "{}={}",
            encode_component(&key),
            encode_component(&value)
        ));
        seen.push(key.into_owned());
    }

    CanonicalQuery {
        query: pairs.join("&"),
        multi_valued,
    }
}

/// Serialize ordered query parameters into a raw form-encoded query string.
pub fn serialize_params(params: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish()
}

/// Split a raw query into the view handed to the signer and the view sent to
/// the server.
pub fn query_views(raw_query: &str) -> QueryViews {
    let transmit = raw_query.replace('+', "%20");
    let canonical = canonicalize(raw_query);

    let signing = if canonical.multi_valued {
        canonical.query
    } else {
        transmit.clone()
    };

    QueryViews { signing, transmit }
}
