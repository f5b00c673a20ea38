use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::fields::{parse_timestamp, CREATED_AT, UPDATED_AT};

/// A stored record: an opaque id plus its field map.
///
/// Serializes flat, with the id alongside the fields, the shape
/// consumers of the facade expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Returns a string field, if present and a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.data.get(field).and_then(Value::as_bool)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.get_str(CREATED_AT).and_then(parse_timestamp)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.get_str(UPDATED_AT).and_then(parse_timestamp)
    }
}
