//! Devices: identifiers, the capability trait and the concrete device kinds.

pub mod binary;
pub mod bus_device;
pub mod demo;
pub mod device;
pub mod factory;
pub mod id;
pub mod types;

pub use bus_device::BusDevice;
pub use demo::DemoDevice;
pub use device::{
    Device, DeviceBase, DeviceContext, DeviceDataChangeCb, DeviceRef, DeviceStatusChangeCb,
};
pub use factory::{DeviceCreateFn, DeviceFactory};
pub use id::{BusElemAddr, BusNum, DeviceId};
pub use types::{DEVICE_TYPE_INDEX_INVALID, DeviceTypeCatalog, DeviceTypeIndex, DeviceTypeRecord};
