//! Bus type registry and live bus set.
//!
//! Ownership and concurrency notes:
//! - Bus instances are owned here for the registry's lifetime and only released together by
//!   [BusRegistry::deinit].
//! - Lookups hand out [Arc] clones and [BusRegistry::service] iterates a cloned snapshot, so no
//!   registry lock is held while a bus runs.

use alloc::{
    format,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use log::{error, info, warn};
use spin::RwLock;
use utils::time::Clock;

use super::{Bus, BusContext, BusEventQueue, BusFactory};
use crate::{
    config::ConfigDoc,
    debug_ex,
    dev::{
        id::{BUS_NUM_FIRST_BUS, BusNum},
        types::DeviceTypeCatalog,
    },
};

struct BusTypeDef {
    name: String,
    factory: BusFactory,
}

#[derive(Default)]
pub struct BusRegistry {
    types: RwLock<Vec<BusTypeDef>>,
    buses: RwLock<Vec<Arc<dyn Bus>>>,
}

impl BusRegistry {
    pub fn new() -> BusRegistry {
        BusRegistry::default()
    }

    /// Register a bus type. Names are not deduplicated; lookups take the first
    /// case-insensitive match.
    pub fn register_bus_type(&self, name: &str, factory: BusFactory) {
        debug_ex!("registered bus type '{}'", name);
        self.types.write().push(BusTypeDef {
            name: name.to_string(),
            factory,
        });
    }

    fn find_factory(&self, type_name: &str) -> Option<BusFactory> {
        self.types
            .read()
            .iter()
            .find(|def| def.name.eq_ignore_ascii_case(type_name))
            .map(|def| def.factory)
    }

    /// Create a bus for every entry of `<section>/buslist` whose `type` is registered.
    /// Unknown types and failed constructions are logged and skipped. Returns the number of
    /// buses created.
    pub fn setup(
        &self,
        section: &str,
        config: &ConfigDoc,
        clock: Arc<dyn Clock>,
        events: BusEventQueue,
        type_catalog: Arc<DeviceTypeCatalog>,
    ) -> usize {
        let mut created = 0;
        for entry in config.get_array(&format!("{}/buslist", section)) {
            let type_name = entry.get_str("type", "");
            let Some(factory) = self.find_factory(&type_name) else {
                warn!("bus type '{}' not registered, entry skipped", type_name);
                continue;
            };
            let bus_num = BUS_NUM_FIRST_BUS + self.buses.read().len() as BusNum;
            let ctx = BusContext {
                bus_num,
                config: entry,
                clock: clock.clone(),
                events: events.clone(),
                type_catalog: type_catalog.clone(),
            };
            match factory(ctx) {
                Ok(bus) => {
                    info!("bus {} '{}' type {} created", bus_num, bus.name(), type_name);
                    self.buses.write().push(bus);
                    created += 1;
                }
                Err(err) => error!("bus type {} not created: {}", type_name, err),
            }
        }
        created
    }

    /// Service every bus once, in creation order.
    pub fn service(&self) {
        for bus in self.buses() {
            bus.service();
        }
    }

    /// Close and release every bus. Safe to call repeatedly or without [BusRegistry::setup].
    pub fn deinit(&self) {
        let buses: Vec<Arc<dyn Bus>> = core::mem::take(&mut *self.buses.write());
        for bus in buses.iter() {
            bus.close();
        }
    }

    /// Snapshot of the live buses in creation order.
    pub fn buses(&self) -> Vec<Arc<dyn Bus>> {
        self.buses.read().clone()
    }

    pub fn len(&self) -> usize {
        self.buses.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Case-insensitive name lookup.
    pub fn get_bus_by_name(&self, name: &str) -> Option<Arc<dyn Bus>> {
        self.buses
            .read()
            .iter()
            .find(|bus| bus.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn get_bus_by_number(&self, bus_num: BusNum) -> Option<Arc<dyn Bus>> {
        self.buses
            .read()
            .iter()
            .find(|bus| bus.bus_num() == bus_num)
            .cloned()
    }
}
