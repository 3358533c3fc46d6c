//! Device type catalog.
//!
//! Maps device type names to small indices that travel in binary records in place of the
//! name. Records are append-only, so an index stays valid for the life of the catalog.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use serde::Serialize;
use serde_json::Value;
use spin::RwLock;

pub type DeviceTypeIndex = u16;
pub const DEVICE_TYPE_INDEX_INVALID: DeviceTypeIndex = 0xFFFF;

/// Description of one device type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceTypeRecord {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub desc: String,
    /// Size of one poll/data sample in bytes, 0 if variable.
    #[serde(rename = "b")]
    pub sample_size: u16,
    /// Free-form type information (field layout, units, ranges).
    #[serde(skip_serializing_if = "Value::is_null")]
    pub info: Value,
}

impl DeviceTypeRecord {
    /// A record that only carries a name.
    pub fn named(name: &str) -> DeviceTypeRecord {
        DeviceTypeRecord {
            name: name.to_string(),
            desc: String::new(),
            sample_size: 0,
            info: Value::Null,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceTypeCatalog {
    records: RwLock<Vec<DeviceTypeRecord>>,
}

impl DeviceTypeCatalog {
    pub fn new() -> DeviceTypeCatalog {
        DeviceTypeCatalog::default()
    }

    /// Add `record` and return its index. A name that is already present keeps its original
    /// record and index.
    pub fn add_record(&self, record: DeviceTypeRecord) -> DeviceTypeIndex {
        let mut guard = self.records.write();
        if let Some(idx) = guard.iter().position(|r| r.name == record.name) {
            return idx as DeviceTypeIndex;
        }
        if guard.len() >= DEVICE_TYPE_INDEX_INVALID as usize {
            return DEVICE_TYPE_INDEX_INVALID;
        }
        guard.push(record);
        (guard.len() - 1) as DeviceTypeIndex
    }

    pub fn index_by_name(&self, name: &str) -> Option<DeviceTypeIndex> {
        self.records
            .read()
            .iter()
            .position(|r| r.name == name)
            .map(|idx| idx as DeviceTypeIndex)
    }

    pub fn record(&self, idx: DeviceTypeIndex) -> Option<DeviceTypeRecord> {
        self.records.read().get(idx as usize).cloned()
    }

    pub fn name(&self, idx: DeviceTypeIndex) -> Option<String> {
        self.records.read().get(idx as usize).map(|r| r.name.clone())
    }

    /// Type information for `name` as JSON.
    pub fn type_info_json(&self, name: &str) -> Option<String> {
        let guard = self.records.read();
        let record = guard.iter().find(|r| r.name == name)?;
        serde_json::to_string(record).ok()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
