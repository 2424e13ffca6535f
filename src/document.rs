//! Parsed JSON payloads with path-based field access.
//!
//! RPC results and stream events are schema-less; callers pick out the
//! fields they need by path instead of declaring a response type up front.
//! A path is a dot-separated list of object keys and array indices, e.g.
//! `"channels.0.state"`.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A well-formed JSON document received from the node.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    raw: String,
    value: Value,
}

impl Document {
    /// Parses `raw` as JSON.
    pub fn parse(raw: impl Into<String>) -> Result<Self, serde_json::Error> {
        let raw = raw.into();
        let value = serde_json::from_str(&raw)?;
        Ok(Self { raw, value })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value = serde_json::from_slice(bytes)?;
        Ok(Self {
            raw: String::from_utf8_lossy(bytes).into_owned(),
            value,
        })
    }

    /// Looks up the value at `path`. An empty path returns the root.
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.value, path)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(Value::as_u64)
    }

    pub fn i64(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_i64)
    }

    pub fn f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    /// Decodes the whole document into a typed value.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }

    /// Decodes the value at `path` into a typed value.
    ///
    /// Returns `None` when the path does not exist.
    pub fn deserialize_at<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Option<Result<T, serde_json::Error>> {
        self.get(path).map(T::deserialize)
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Body text exactly as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }

    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
