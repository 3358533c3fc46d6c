//! The system module contract and module type registrations.

use alloc::{
    boxed::Box,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

use crate::{
    api::{CommsCore, DataSource, DataSourceOffer, RestApiEndpoints},
    config::ConfigDoc,
    error::RetCode,
};

/// Called when a module goes on- or offline: `(module_name, is_online)`.
pub type ModuleStatusChangeCb = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// A unit of recurring work serviced once per supervisor pass.
///
/// Only [SysMod::name] is required. Modules are trusted peers: the supervisor does not catch
/// a panicking [SysMod::service], and a slow one is reported but still runs every pass.
pub trait SysMod: Send {
    fn name(&self) -> &str;

    /// Phase 1. Every module completes this before any module enters phase 2.
    fn setup(&mut self) {}
    /// Phase 2.
    fn add_rest_api_endpoints(&mut self, _endpoints: &mut dyn RestApiEndpoints) {}
    /// Phase 2.
    fn add_comms_channels(&mut self, _comms: &mut dyn CommsCore) {}
    /// Phase 3, before any [SysMod::post_setup]. Each offer is routed to its publisher
    /// through [SysMod::register_data_source].
    fn data_source_offers(&self) -> Vec<DataSourceOffer> {
        Vec::new()
    }
    /// Phase 3. Peers are fully set up by now.
    fn post_setup(&mut self) {}

    /// One bounded slice of work.
    fn service(&mut self) {}

    fn status_json(&self) -> String {
        r#"{"rslt":"ok"}"#.to_string()
    }
    fn debug_json(&self) -> String {
        "{}".to_string()
    }
    fn receive_cmd_json(&mut self, _cmd_json: &str) -> RetCode {
        RetCode::InvalidOperation
    }

    fn named_value(&self, _value_name: &str) -> Option<f64> {
        None
    }
    fn set_named_value(&mut self, _value_name: &str, _value: f64) -> bool {
        false
    }
    fn named_string(&self, _value_name: &str) -> Option<String> {
        None
    }
    fn set_named_string(&mut self, _value_name: &str, _value: &str) -> bool {
        false
    }

    fn set_status_change_cb(&mut self, _cb: ModuleStatusChangeCb) {}
    fn register_data_source(&mut self, _topic: &str, _source: DataSource) -> bool {
        false
    }
    /// A restart has been requested and will happen shortly.
    fn notify_of_shutdown(&mut self) {}
}

/// Builds a module instance from `(module_name, system_config)`.
pub type ModuleFactory = Box<dyn Fn(&str, &ConfigDoc) -> Option<Box<dyn SysMod>> + Send>;

/// A module type the supervisor may instantiate during setup.
pub struct ModuleTypeDef {
    pub name: String,
    pub factory: ModuleFactory,
    pub always_enable: bool,
    pub dependencies: Vec<String>,
}

impl ModuleTypeDef {
    /// `dependency_csv` is a comma separated list of module names, blanks ignored.
    pub fn new(name: &str, factory: ModuleFactory, always_enable: bool, dependency_csv: &str) -> Self {
        ModuleTypeDef {
            name: name.to_string(),
            factory,
            always_enable,
            dependencies: dependency_csv
                .split(',')
                .map(str::trim)
                .filter(|dep| !dep.is_empty())
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl core::fmt::Debug for ModuleTypeDef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleTypeDef")
            .field("name", &self.name)
            .field("always_enable", &self.always_enable)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
