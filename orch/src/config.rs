//! Configuration document access.
//!
//! Configuration arrives as one JSON document. [ConfigDoc] wraps a [serde_json::Value] and
//! resolves `/`-separated paths (`Buses/buslist`, `Devices/0/class`). Numeric path segments
//! index into arrays. Typed getters take a default that is returned when the key is missing
//! or has the wrong shape; structured sections are read through [ConfigDoc::deserialize].

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Parse(String),
    #[error("invalid section '{path}': {reason}")]
    Invalid { path: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDoc {
    root: Value,
}

impl From<Value> for ConfigDoc {
    fn from(root: Value) -> Self {
        ConfigDoc { root }
    }
}

impl ConfigDoc {
    pub fn new(root: Value) -> ConfigDoc {
        ConfigDoc { root }
    }

    pub fn parse(text: &str) -> Result<ConfigDoc, ConfigError> {
        serde_json::from_str(text)
            .map(ConfigDoc::new)
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        match &self.root {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Resolve `path` against the document. An empty path is the root.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut cur = &self.root;
        for seg in path.split('/').filter(|seg| !seg.is_empty()) {
            cur = match cur {
                Value::Object(map) => map.get(seg)?,
                Value::Array(arr) => arr.get(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    pub fn get_str(&self, path: &str, default: &str) -> String {
        match self.lookup(path) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    /// Booleans also accept numbers (non-zero is true).
    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        match self.lookup(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(default),
            _ => default,
        }
    }

    /// Unsigned integers also accept decimal or `0x` hex strings.
    pub fn get_u64(&self, path: &str, default: u64) -> u64 {
        match self.lookup(path) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Some(Value::String(s)) => parse_u64(s).unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_i64(&self, path: &str, default: i64) -> i64 {
        match self.lookup(path) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    /// Elements of the array at `path`; empty when absent or not an array.
    pub fn get_array(&self, path: &str) -> Vec<ConfigDoc> {
        match self.lookup(path) {
            Some(Value::Array(arr)) => arr.iter().cloned().map(ConfigDoc::new).collect(),
            _ => Vec::new(),
        }
    }

    /// The sub-document at `path`, or an empty document.
    pub fn prefixed(&self, path: &str) -> ConfigDoc {
        self.lookup(path)
            .cloned()
            .map(ConfigDoc::new)
            .unwrap_or_default()
    }

    /// Deserialize the section at `path`. A missing section deserializes from `{}` so that
    /// `#[serde(default)]` types come back with their defaults.
    pub fn deserialize<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConfigError> {
        let value = match self.lookup(path) {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(v) => v.clone(),
        };
        serde_json::from_value(value).map_err(|err| ConfigError::Invalid {
            path: path.to_string(),
            reason: err.to_string(),
        })
    }
}

pub fn parse_u64(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

// region: Sections

/// Tuning for the module supervisor, read from its own config section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupervisorConfig {
    pub slow_sys_mod_ms: u64,
    pub monitor_period_ms: u64,
    pub report_list: Vec<String>,
    pub reboot_after_n_hours: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            slow_sys_mod_ms: 50,
            monitor_period_ms: 10_000,
            report_list: Vec::new(),
            reboot_after_n_hours: 0,
        }
    }
}

impl SupervisorConfig {
    pub fn slow_threshold_us(&self) -> u64 {
        self.slow_sys_mod_ms * 1000
    }
}

/// Tuning for the device manager.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceManagerConfig {
    pub max_devices: usize,
    pub lock_wait_ms: u64,
}

impl Default for DeviceManagerConfig {
    fn default() -> Self {
        DeviceManagerConfig {
            max_devices: 100,
            lock_wait_ms: 5,
        }
    }
}

// endregion
