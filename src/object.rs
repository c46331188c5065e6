use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::encode_component;
use crate::time::now_millis;

/// Default object type for objects created without one
pub const DEFAULT_TYPE: &str = "sysprop";

/// A domain object stored by Para: a map of field names to JSON values.
///
/// The well-known fields (`id`, `type`, `appid`, `name`, `timestamp`, ...)
/// have typed accessors; everything else is reached through [`get`](Self::get)
/// and [`set`](Self::set).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParaObject(Map<String, Value>);

impl ParaObject {
    /// Create an object of the given type, stamped with the current time
    pub fn new(id: Option<&str>, object_type: &str) -> Self {
        let mut obj = ParaObject(Map::new());
        if let Some(id) = id {
            obj.set("id", id);
        }
        obj.set("type", object_type);
        obj.set("timestamp", now_millis());
        obj
    }

    /// Build an object from a JSON value; anything but an object yields `None`
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(ParaObject(map)),
            _ => None,
        }
    }

    /// Merge fields into this object, overwriting existing ones
    pub fn set_fields(&mut self, fields: Map<String, Value>) {
        self.0.extend(fields);
    }

    /// Value of any field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Set a field, replacing any previous value
    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.0.insert(field.to_string(), value.into());
    }

    fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Object id, `None` until the server assigns one
    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }

    /// Object type, `sysprop` when unset
    pub fn object_type(&self) -> &str {
        self.get_str("type").unwrap_or(DEFAULT_TYPE)
    }

    /// Id of the app owning the object
    pub fn appid(&self) -> Option<&str> {
        self.get_str("appid")
    }

    /// Display name
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    /// Creation time in epoch milliseconds
    pub fn timestamp(&self) -> Option<i64> {
        self.0.get("timestamp").and_then(Value::as_i64)
    }

    /// All fields as a JSON map
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the object has no fields at all
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Relative URI of the object, e.g. `/dog/123`
    pub fn object_uri(&self) -> String {
        let uri = format!("/{}", encode_component(self.object_type()));
        match self.id() {
            Some(id) => format!("{}/{}", uri, encode_component(id)),
            None => uri,
        }
    }
}

impl From<Map<String, Value>> for ParaObject {
    fn from(fields: Map<String, Value>) -> Self {
        ParaObject(fields)
    }
}
