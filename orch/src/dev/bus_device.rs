//! Device discovered on a bus.

use alloc::{
    format,
    string::{String, ToString},
    sync::Arc,
};
use serde_json::json;

use super::{
    device::{Device, DeviceBase, DeviceDataChangeCb},
    id::{BusElemAddr, DeviceId},
    types::DeviceTypeIndex,
};
use crate::bus::Bus;

/// Class name reported by every bus-attached device.
pub const BUS_DEVICE_CLASS_NAME: &str = "BusDevice";

/// A device that lives at an address on a bus. Data and type information come from the bus.
pub struct BusDevice {
    base: DeviceBase,
    bus: Arc<dyn Bus>,
    address: BusElemAddr,
}

impl BusDevice {
    pub fn new(bus: Arc<dyn Bus>, address: BusElemAddr, type_index: DeviceTypeIndex, type_name: &str) -> BusDevice {
        let name = format!("{}_{:x}", bus.name(), address);
        let base = DeviceBase::with_names(BUS_DEVICE_CLASS_NAME, type_name, &name);
        base.assign_id(DeviceId::new(bus.bus_num(), address));
        base.set_type_index(type_index);
        BusDevice { base, bus, address }
    }

    pub fn address(&self) -> BusElemAddr {
        self.address
    }

    pub fn bus(&self) -> &Arc<dyn Bus> {
        &self.bus
    }
}

impl Device for BusDevice {
    fn base(&self) -> &DeviceBase {
        &self.base
    }

    fn publish_device_type(&self) -> String {
        self.base.type_name().into()
    }

    fn register_for_device_data(&self, cb: DeviceDataChangeCb, min_interval_ms: u32) -> bool {
        match self.bus.devices() {
            Some(devices) => devices.register_for_device_data(self.address, cb, min_interval_ms),
            None => false,
        }
    }

    fn debug_json(&self) -> String {
        json!({
            "name": self.base.name(),
            "type": self.base.type_name(),
            "bus": self.bus.name(),
            "state": self.base.online_state().as_str(),
        })
        .to_string()
    }
}
