//! The generic store configuration tree.
//!
//! A [`StoreConfig`] is a map of string keys to either scalar values or
//! nested subtrees. Stores read their own keys with the typed accessors and
//! hand subtrees (`primary`, `secondary`, `bucket0`, `model`, …) to the
//! stores they instantiate.
//!
//! Scalars are kept as strings internally; TOML booleans and integers are
//! coerced on load (`true` becomes `yes`, matching the flag dialect the
//! store keys use), so hand-written `write_meta = "yes"` and
//! `write_meta = true` behave identically.

use std::collections::BTreeMap;

use serde::de::{Deserialize, Deserializer};

/// A string-or-subtree configuration node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    values: BTreeMap<String, String>,
    children: BTreeMap<String, StoreConfig>,
}

impl StoreConfig {
    /// Empty config node; every accessor returns `None`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scalar value for `key`, if present.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Scalar value for `key` parsed as an unsigned integer.
    ///
    /// An unparsable value is reported and treated as absent.
    pub fn get_unsigned(&self, key: &str) -> Option<u64> {
        let raw = self.values.get(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "config value is not an unsigned integer");
                None
            }
        }
    }

    /// Scalar value for `key` parsed as a signed integer.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        let raw = self.values.get(key)?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, value = %raw, "config value is not an integer");
                None
            }
        }
    }

    /// Flag value for `key`: `yes`/`true`/`1` is true, `no`/`false`/`0` is
    /// false, anything else is reported and treated as absent.
    pub fn get_flag(&self, key: &str) -> Option<bool> {
        let raw = self.values.get(key)?;
        match raw.as_str() {
            "yes" | "true" | "1" => Some(true),
            "no" | "false" | "0" => Some(false),
            other => {
                tracing::warn!(key, value = %other, "config value is not a yes/no flag");
                None
            }
        }
    }

    /// Nested subtree for `key`, if present.
    pub fn get_store(&self, key: &str) -> Option<&StoreConfig> {
        self.children.get(key)
    }

    /// True if `key` exists as either a scalar or a subtree.
    pub fn has_key(&self, key: &str) -> bool {
        self.values.contains_key(key) || self.children.contains_key(key)
    }

    /// Set or replace a scalar value. Used by stores that expand a template
    /// subtree into per-child configs.
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Insert or replace a nested subtree.
    pub fn set_store(&mut self, key: impl Into<String>, child: StoreConfig) {
        self.children.insert(key.into(), child);
    }

    /// Names of all nested subtrees.
    pub fn store_keys(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }
}

/// Intermediate shape for deserialization: TOML scalars in their native
/// types, tables as nested maps.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Table(BTreeMap<String, RawValue>),
}

fn from_raw(map: BTreeMap<String, RawValue>) -> StoreConfig {
    let mut config = StoreConfig::default();
    for (key, value) in map {
        match value {
            RawValue::Bool(b) => {
                config.values.insert(key, if b { "yes" } else { "no" }.into());
            }
            RawValue::Int(i) => {
                config.values.insert(key, i.to_string());
            }
            RawValue::Float(f) => {
                config.values.insert(key, f.to_string());
            }
            RawValue::Str(s) => {
                config.values.insert(key, s);
            }
            RawValue::Table(t) => {
                config.children.insert(key, from_raw(t));
            }
        }
    }
    config
}

impl<'de> Deserialize<'de> for StoreConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, RawValue>::deserialize(deserializer)?;
        Ok(from_raw(raw))
    }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
