use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ProjectionError;

/// Ordered string-to-string map carried by every RPC request and response.
///
/// Inserting a key that is already present replaces the value in place, so
/// the map keeps first-seen order and last-written value.
#[derive(Debug, Clone, Default)]
pub struct ParameterMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Insert a field, returning the previous value if the key existed
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.index.get(&key) {
            Some(&slot) => Some(std::mem::replace(&mut self.entries[slot].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Insert only when a value is present; absent fields never reach the wire
    pub fn insert_opt<V: Into<String>>(&mut self, key: impl Into<String>, value: Option<V>) {
        if let Some(value) = value {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.index
            .get(key)
            .map(|&slot| self.entries[slot].1.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let slot = self.index.remove(key)?;
        let (_, value) = self.entries.remove(slot);
        for position in self.index.values_mut() {
            if *position > slot {
                *position -= 1;
            }
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Fields whose name starts with `_`, with the underscore stripped.
    /// Bulk, match and script responses carry their payload this way.
    pub fn underscored(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .filter_map(|(k, v)| k.strip_prefix('_').map(|stripped| (stripped, v)))
    }

    pub fn require(&self, key: &str) -> Result<&str, ProjectionError> {
        self.get(key)
            .ok_or_else(|| ProjectionError::MissingField(key.to_string()))
    }

    /// Required field parsed into a number or other `FromStr` type
    pub fn require_parsed<T: FromStr>(&self, key: &str) -> Result<T, ProjectionError> {
        let raw = self.require(key)?;
        raw.trim().parse().map_err(|_| ProjectionError::InvalidField {
            field: key.to_string(),
            value: raw.to_string(),
        })
    }

    /// Optional field parsed when present
    pub fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ProjectionError> {
        match self.get(key) {
            Some(_) => self.require_parsed(key).map(Some),
            None => Ok(None),
        }
    }
}

impl PartialEq for ParameterMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for ParameterMap {}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ParameterMap::new();
        map.extend(iter);
        map
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for ParameterMap {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl IntoIterator for ParameterMap {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Requested expiration of a record.
///
/// The server reads a positive `xt` as seconds from now and a negative one
/// as an absolute epoch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Seconds from now
    After(u64),
    /// Absolute epoch seconds
    At(i64),
}

impl Expiry {
    pub fn at(time: DateTime<Utc>) -> Self {
        Expiry::At(time.timestamp())
    }

    /// Wire representation of the `xt` field
    pub fn to_param(self) -> String {
        match self {
            Expiry::After(secs) => secs.to_string(),
            Expiry::At(epoch) => format!("-{}", epoch.unsigned_abs()),
        }
    }
}

impl From<Duration> for Expiry {
    fn from(duration: Duration) -> Self {
        Expiry::After(duration.as_secs())
    }
}

/// A record as returned by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: String,
    /// Absolute expiration in epoch seconds, `None` when the record never expires
    pub expires: Option<i64>,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires: None,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
    }
}

/// Size and expiration of a record, as reported by `check`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    pub vsiz: u64,
    pub expires: Option<i64>,
}

/// Keys returned by a prefix or regex query together with the server count
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    pub keys: Vec<String>,
    pub num: u64,
}

impl MatchResult {
    pub fn from_fields(fields: &ParameterMap) -> Result<Self, ProjectionError> {
        let num = fields.require_parsed("num")?;
        let keys = fields.underscored().map(|(k, _)| k.to_string()).collect();
        Ok(Self { keys, num })
    }
}

/// Scan direction over the ordered key space
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// Database report returned by `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    fields: ParameterMap,
}

impl ServerStatus {
    pub fn new(fields: ParameterMap) -> Self {
        Self { fields }
    }

    /// Number of records
    pub fn count(&self) -> Option<u64> {
        self.fields.get("count").and_then(|v| v.parse().ok())
    }

    /// Size of the database in bytes
    pub fn size(&self) -> Option<u64> {
        self.fields.get("size").and_then(|v| v.parse().ok())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &ParameterMap {
        &self.fields
    }
}
