//! The device capability contract.
//!
//! Every device kind (bus-attached, directly configured, synthetic) implements [Device].
//! Devices are shared as [DeviceRef] and are never freed while the manager that created them
//! is alive, so a reference taken from a frozen directory snapshot stays usable for as long
//! as the caller holds it. Methods take `&self`; devices keep their mutable state behind
//! their own locks or atomics.

use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicU8, AtomicU16, Ordering};
use spin::Once;
use utils::time::Clock;

use super::{
    id::DeviceId,
    types::{DEVICE_TYPE_INDEX_INVALID, DeviceTypeCatalog, DeviceTypeIndex, DeviceTypeRecord},
};
use crate::{
    api::{CommsCore, RestApiEndpoints},
    bus::{BusAddrStatus, DeviceOnlineState},
    config::ConfigDoc,
    error::RetCode,
};

pub type DeviceRef = Arc<dyn Device>;

/// New data from a device: `(device_type_index, sample_bytes)`.
pub type DeviceDataChangeCb = Arc<dyn Fn(DeviceTypeIndex, &[u8]) + Send + Sync>;

/// A device's presence changed.
pub type DeviceStatusChangeCb = Arc<dyn Fn(&dyn Device, &BusAddrStatus) + Send + Sync>;

/// What a device constructor may use besides its own config.
#[derive(Clone)]
pub struct DeviceContext {
    pub clock: Arc<dyn Clock>,
    pub type_catalog: Arc<DeviceTypeCatalog>,
}

// region: DeviceBase

/// Attributes every device carries.
#[derive(Debug)]
pub struct DeviceBase {
    class_name: String,
    type_name: String,
    name: String,
    config: ConfigDoc,
    id: Once<DeviceId>,
    type_index: AtomicU16,
    online_state: AtomicU8,
}

impl DeviceBase {
    /// Names come from the `name` and `type` keys; the type defaults to the class name.
    pub fn from_config(class_name: &str, config: ConfigDoc) -> DeviceBase {
        let name = config.get_str("name", "UNKNOWN");
        let type_name = config.get_str("type", class_name);
        DeviceBase {
            class_name: class_name.to_string(),
            type_name,
            name,
            config,
            id: Once::new(),
            type_index: AtomicU16::new(DEVICE_TYPE_INDEX_INVALID),
            online_state: AtomicU8::new(DeviceOnlineState::Initial.into()),
        }
    }

    pub fn with_names(class_name: &str, type_name: &str, name: &str) -> DeviceBase {
        DeviceBase {
            class_name: class_name.to_string(),
            type_name: type_name.to_string(),
            name: name.to_string(),
            config: ConfigDoc::default(),
            id: Once::new(),
            type_index: AtomicU16::new(DEVICE_TYPE_INDEX_INVALID),
            online_state: AtomicU8::new(DeviceOnlineState::Initial.into()),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConfigDoc {
        &self.config
    }

    /// Assign the identifier. It can only be set once; returns whether `id` is now the
    /// device's identifier.
    pub fn assign_id(&self, id: DeviceId) -> bool {
        *self.id.call_once(|| id) == id
    }

    /// The assigned identifier, or [DeviceId::invalid] before assignment.
    pub fn id(&self) -> DeviceId {
        self.id.get().copied().unwrap_or_default()
    }

    pub fn type_index(&self) -> DeviceTypeIndex {
        self.type_index.load(Ordering::Relaxed)
    }

    pub fn set_type_index(&self, idx: DeviceTypeIndex) {
        self.type_index.store(idx, Ordering::Relaxed);
    }

    pub fn online_state(&self) -> DeviceOnlineState {
        DeviceOnlineState::try_from(self.online_state.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set_online_state(&self, state: DeviceOnlineState) {
        self.online_state.store(state.into(), Ordering::Relaxed);
    }
}

// endregion

/// Capability set of a device. Only [Device::base] is required.
pub trait Device: Send + Sync {
    fn base(&self) -> &DeviceBase;

    fn name(&self) -> &str {
        self.base().name()
    }
    fn class_name(&self) -> &str {
        self.base().class_name()
    }
    fn id(&self) -> DeviceId {
        self.base().id()
    }
    /// Type name used as the key of this device's entry in the JSON aggregate.
    fn publish_device_type(&self) -> String {
        self.base().class_name().to_string()
    }
    fn id_matches(&self, id: DeviceId) -> bool {
        self.base().id() == id
    }

    fn setup(&self) {}
    fn post_setup(&self) {}
    fn service(&self) {}
    fn add_rest_api_endpoints(&self, _endpoints: &mut dyn RestApiEndpoints) {}
    fn add_comms_channels(&self, _comms: &mut dyn CommsCore) {}

    fn status_json(&self) -> String {
        "{}".to_string()
    }
    /// Records in the layout of [crate::dev::binary].
    fn status_binary(&self) -> Vec<u8> {
        Vec::new()
    }
    fn debug_json(&self) -> String {
        "{}".to_string()
    }
    /// Changes whenever the device has something new to publish.
    fn state_hash(&self) -> u32 {
        0
    }

    fn named_value(&self, _value_name: &str) -> Option<f64> {
        None
    }
    fn named_string(&self, _value_name: &str) -> Option<String> {
        None
    }
    fn send_cmd_json(&self, _cmd_json: &str) -> RetCode {
        RetCode::InvalidOperation
    }

    /// Ask the device to report new data to `cb`, at most every `min_interval_ms`.
    /// Returns false if the device cannot report data.
    fn register_for_device_data(&self, _cb: DeviceDataChangeCb, _min_interval_ms: u32) -> bool {
        false
    }
    fn handle_status_change(&self, status: &BusAddrStatus) {
        self.base().set_online_state(status.online_state);
    }
    /// A record for the global type catalog, if this device defines its own type.
    fn device_type_record(&self) -> Option<DeviceTypeRecord> {
        None
    }
}
