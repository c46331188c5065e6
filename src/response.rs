use serde_json::Value;

use crate::error::{ParaError, Result};

/// Raw response returned by a transport, passed upward unparsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Reason phrase, when the transport knows it
    pub reason: Option<String>,
    /// Response body bytes
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a response from its parts
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        HttpResponse {
            status,
            reason: None,
            body: body.into(),
        }
    }

    /// True for any 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as (lossy) UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Decode the entity carried by this response.
    ///
    /// 200, 201 and 304 yield the JSON body (an empty body becomes `{}` and a
    /// non-JSON body is returned as a string); 204 and 404 yield `None`; any
    /// other status is an [`ParaError::Api`] error.
    pub fn entity(&self) -> Result<Option<Value>> {
        match self.status {
            200 | 201 | 304 => {
                if self.body.iter().all(u8::is_ascii_whitespace) {
                    return Ok(Some(Value::Object(serde_json::Map::new())));
                }
                match serde_json::from_slice::<Value>(&self.body) {
                    Ok(Value::Null) => Ok(Some(Value::Object(serde_json::Map::new()))),
                    Ok(value) => Ok(Some(value)),
                    Err(_) => Ok(Some(Value::String(self.text()))),
                }
            }
            204 | 404 => Ok(None),
            status => {
                let error = ParaError::api(status, &self.body, self.reason.as_deref());
                tracing::error!(status, error = %error, "request failed");
                Err(error)
            }
        }
    }

    /// Deserialize the entity into `T`, `None` when there is no entity
    pub fn apply<T>(&self) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        match self.entity()? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

/// Get a value from a JSON tree by a slash-separated path.
/// For example, "jwt/access_token" reads the "access_token" field inside "jwt".
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('/').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                arr.get(index)?
            }
            _ => return None,
        };
    }

    Some(current)
}
