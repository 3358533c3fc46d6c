//! Device class registry.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};
use spin::RwLock;

use super::device::{DeviceContext, DeviceRef};
use crate::{
    config::ConfigDoc,
    debug_ex,
    error::{Error, Result},
};

/// Builds a device from `(class_name, device_config, context)`. `None` means construction
/// failed.
pub type DeviceCreateFn = fn(&str, ConfigDoc, &DeviceContext) -> Option<DeviceRef>;

struct DeviceClassDef {
    name: String,
    create: DeviceCreateFn,
}

#[derive(Default)]
pub struct DeviceFactory {
    classes: RwLock<Vec<DeviceClassDef>>,
}

impl DeviceFactory {
    pub fn new() -> DeviceFactory {
        DeviceFactory::default()
    }

    /// Factory with the classes shipped in this crate.
    pub fn with_builtin() -> DeviceFactory {
        let factory = DeviceFactory::new();
        factory.register_device_class(super::demo::DEMO_DEVICE_CLASS_NAME, super::demo::DemoDevice::create);
        factory
    }

    /// Register `name`; registering an existing name replaces its constructor.
    pub fn register_device_class(&self, name: &str, create: DeviceCreateFn) {
        debug_ex!("registered device class '{}'", name);
        let mut guard = self.classes.write();
        match guard.iter_mut().find(|def| def.name == name) {
            Some(def) => def.create = create,
            None => guard.push(DeviceClassDef {
                name: name.to_string(),
                create,
            }),
        }
    }

    /// Exact-name lookup.
    pub fn find_device_class(&self, name: &str) -> Option<DeviceCreateFn> {
        self.classes
            .read()
            .iter()
            .find(|def| def.name == name)
            .map(|def| def.create)
    }

    pub fn create(&self, class_name: &str, config: ConfigDoc, ctx: &DeviceContext) -> Result<DeviceRef> {
        let create = self
            .find_device_class(class_name)
            .ok_or_else(|| Error::UnknownDeviceClass(class_name.to_string()))?;
        create(class_name, config, ctx).ok_or_else(|| Error::DeviceCreate(class_name.to_string()))
    }
}
