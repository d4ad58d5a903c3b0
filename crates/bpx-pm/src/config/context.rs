use indexmap::IndexMap;
use serde_json::Value;
use std::path::PathBuf;

use crate::error::{BuildpackError, Result};

/// Well-known context keys
pub mod keys {
    pub const BP_DIR: &str = "BP_DIR";
    pub const BUILD_DIR: &str = "BUILD_DIR";
    pub const CACHE_DIR: &str = "CACHE_DIR";
    pub const TMPDIR: &str = "TMPDIR";
    pub const CACHE_HASH_ALGORITHM: &str = "CACHE_HASH_ALGORITHM";
    pub const USE_EXTERNAL_HASH: &str = "USE_EXTERNAL_HASH";
    pub const USE_CACHE: &str = "USE_CACHE";
    pub const FILE_CACHE_BASE_DIRECTORY: &str = "FILE_CACHE_BASE_DIRECTORY";
    pub const DOWNLOAD_METHOD: &str = "DOWNLOAD_METHOD";
    pub const DOWNLOAD_CLASS: &str = "DOWNLOAD_CLASS";
    pub const DOWNLOAD_TIMEOUT: &str = "DOWNLOAD_TIMEOUT";
    pub const DOWNLOAD_RETRIES: &str = "DOWNLOAD_RETRIES";
    pub const START_SCRIPT_NAME: &str = "START_SCRIPT_NAME";
    pub const MODULE_NAME: &str = "MODULE_NAME";
}

/// Immutable snapshot of the build configuration.
///
/// Values keep their JSON shape so structured options survive, but most
/// callers read them through the string accessors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    values: IndexMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: IndexMap<String, Value>) -> Self {
        Self { values }
    }

    /// Build a context from string pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Value::String(v.into())))
                .collect(),
        }
    }

    /// Return a new snapshot with one extra binding; `self` is left as is
    pub fn with(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut values = self.values.clone();
        values.insert(key.into(), value.into());
        Self { values }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Read a scalar value as a string. Numbers and booleans are rendered,
    /// null, arrays and objects are not.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Read a required scalar value
    pub fn require(&self, key: &str) -> Result<String> {
        self.get_str(key).ok_or_else(|| BuildpackError::Config {
            key: key.to_string(),
        })
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(n.as_i64() != Some(0)),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).filter(|s| !s.is_empty()).map(PathBuf::from)
    }

    /// Temp space, falling back to the system temp directory
    pub fn temp_dir(&self) -> PathBuf {
        self.get_path(keys::TMPDIR)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay `other` on top of this context. Only the loader uses this;
    /// once handed out a context is never changed.
    pub(crate) fn merge(&mut self, other: IndexMap<String, Value>) {
        for (key, value) in other {
            self.values.insert(key, value);
        }
    }

    pub(crate) fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }
}
