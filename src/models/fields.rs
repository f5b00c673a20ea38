//! Write payloads for the document store.
//!
//! A write is a set of field values, some of which may be the
//! [`FieldValue::ServerTimestamp`] sentinel. The store replaces sentinels
//! with its own clock when the write is applied, so every timestamp on a
//! record comes from the same source.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field written by the store when a record is created.
pub const CREATED_AT: &str = "createdAt";
/// Field refreshed by the store on every write.
pub const UPDATED_AT: &str = "updatedAt";

/// A single value in a write payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A literal JSON value.
    Value(Value),
    /// Resolved to the store's clock when the write is applied.
    ServerTimestamp,
}

/// An ordered set of field writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: BTreeMap<String, FieldValue>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field to a literal value.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a field to the store's clock.
    pub fn server_timestamp(mut self, name: impl Into<String>) -> Self {
        self.entries
            .insert(name.into(), FieldValue::ServerTimestamp);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries
            .insert(name.into(), FieldValue::Value(value.into()));
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.entries.iter()
    }

    /// Resolves sentinels against `now` and merges the result into `target`.
    pub fn apply_to(&self, target: &mut Map<String, Value>, now: DateTime<Utc>) {
        let stamp = format_timestamp(now);
        for (name, value) in &self.entries {
            let resolved = match value {
                FieldValue::Value(v) => v.clone(),
                FieldValue::ServerTimestamp => Value::String(stamp.clone()),
            };
            target.insert(name.clone(), resolved);
        }
    }
}

impl From<Map<String, Value>> for Fields {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            entries: map
                .into_iter()
                .map(|(k, v)| (k, FieldValue::Value(v)))
                .collect(),
        }
    }
}

impl FromIterator<(String, Value)> for Fields {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k, FieldValue::Value(v)))
                .collect(),
        }
    }
}

/// Formats a timestamp the way the store persists it.
///
/// Fixed microsecond precision keeps string order equal to time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a timestamp written by [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
