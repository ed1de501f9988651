//! JSON field access for provider payloads
//!
//! Every logical attribute is read through an ordered list of alias keys.
//! The first key that is present with a non-null value wins; if that value
//! has the wrong shape the whole payload is rejected rather than falling
//! through to the next alias.

use crate::error::{CloudError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Naive formats the control plane has been seen to emit (interpreted as UTC)
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
];

/// Read-only view over one JSON object of a given resource kind
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    kind: &'static str,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    /// Wrap a payload that must be a JSON object
    pub fn new(kind: &'static str, value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self { kind, map }),
            other => Err(CloudError::malformed(
                kind,
                format!("expected an object, got {}", type_name(other)),
            )),
        }
    }

    /// First alias present with a non-null value
    pub fn first_present(&self, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        keys.iter().find_map(|key| match self.map.get(*key) {
            Some(Value::Null) | None => None,
            Some(value) => Some((*key, value)),
        })
    }

    /// Raw key/value pairs
    pub fn entries(&self) -> impl Iterator<Item = (&'a String, &'a Value)> {
        let map: &'a Map<String, Value> = self.map;
        map.iter()
    }

    /// String attribute
    pub fn string(&self, keys: &[&'static str]) -> Result<Option<String>> {
        match self.first_present(keys) {
            None => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.clone())),
            Some((key, other)) => Err(self.wrong_shape(key, "a string", other)),
        }
    }

    /// Identifier attribute: strings, or integers as older APIs emit them
    pub fn id(&self, keys: &[&'static str]) -> Result<Option<String>> {
        match self.first_present(keys) {
            None => Ok(None),
            Some((_, Value::String(s))) => Ok(Some(s.clone())),
            Some((_, Value::Number(n))) if n.is_i64() || n.is_u64() => Ok(Some(n.to_string())),
            Some((key, other)) => Err(self.wrong_shape(key, "a string or integer id", other)),
        }
    }

    /// Non-negative integer attribute
    pub fn u64(&self, keys: &[&'static str]) -> Result<Option<u64>> {
        match self.first_present(keys) {
            None => Ok(None),
            Some((key, value)) => match value.as_u64() {
                Some(n) => Ok(Some(n)),
                None => Err(self.wrong_shape(key, "a non-negative integer", value)),
            },
        }
    }

    /// Nested object
    pub fn object(&self, key: &'static str) -> Result<Option<Fields<'a>>> {
        match self.first_present(&[key]) {
            None => Ok(None),
            Some((_, Value::Object(map))) => Ok(Some(Fields {
                kind: self.kind,
                map,
            })),
            Some((key, other)) => Err(self.wrong_shape(key, "an object", other)),
        }
    }

    /// Nested array
    pub fn array(&self, key: &'static str) -> Result<Option<&'a Vec<Value>>> {
        match self.first_present(&[key]) {
            None => Ok(None),
            Some((_, Value::Array(items))) => Ok(Some(items)),
            Some((key, other)) => Err(self.wrong_shape(key, "an array", other)),
        }
    }

    /// Key/value metadata; scalar values are stringified, nulls skipped
    pub fn string_map(&self, key: &'static str) -> Result<BTreeMap<String, String>> {
        let Some(nested) = self.object(key)? else {
            return Ok(BTreeMap::new());
        };

        let mut out = BTreeMap::new();
        for (k, v) in nested.map {
            let value = match v {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => return Err(self.wrong_shape(key, "a map of scalar values", other)),
            };
            out.insert(k.clone(), value);
        }
        Ok(out)
    }

    /// Provider timestamp; an unparseable string is reported as unknown
    pub fn timestamp(&self, keys: &[&'static str]) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.string(keys)? else {
            return Ok(None);
        };
        let parsed = parse_timestamp(&raw);
        if parsed.is_none() {
            tracing::warn!("Unrecognized {} timestamp: {}", self.kind, raw);
        }
        Ok(parsed)
    }

    /// Iterate nested objects of an array, rejecting non-object elements
    pub fn objects(&self, key: &'static str) -> Result<Vec<Fields<'a>>> {
        let Some(items) = self.array(key)? else {
            return Ok(Vec::new());
        };
        items.iter().map(|item| Fields::new(self.kind, item)).collect()
    }

    fn wrong_shape(&self, key: &str, expected: &str, got: &Value) -> CloudError {
        CloudError::malformed(
            self.kind,
            format!("field '{}' should be {}, got {}", key, expected, type_name(got)),
        )
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse a provider timestamp
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Case-insensitive substring match against a keyword table; first match wins
pub fn match_keyword<T: Copy>(text: &str, table: &[(&str, T)]) -> Option<T> {
    let lower = text.to_lowercase();
    table
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, value)| *value)
}

/// Unwrap `{"<key>": {...}}` envelopes the API puts around single resources
pub fn unwrap_envelope<'a>(kind: &'static str, body: &'a Value, key: &'static str) -> Result<Option<&'a Value>> {
    match Fields::new(kind, body)?.first_present(&[key]) {
        None => Ok(None),
        Some((_, inner)) => Ok(Some(inner)),
    }
}
