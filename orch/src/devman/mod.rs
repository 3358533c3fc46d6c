//! Device manager.
//!
//! Responsibilities:
//! - Create the buses listed in config and the directly configured devices, and run their
//!   setup in order (see [DeviceManager::setup_devices]).
//! - React to bus element status changes: create a [BusDevice] the first time a bus
//!   positively identifies an element, keep the directory's online flags current and fan
//!   changes out to status subscribers.
//! - Hand data subscriptions to matching devices, once per (subscription, device) pair.
//! - Aggregate device data into JSON or binary payloads for publishing, with a 2-byte change
//!   signature so a publisher can skip unchanged passes. The JSON form is offered to the
//!   [DEVMAN_PUBLISHER] module at post-setup.
//! - Serve the `devman` REST endpoint, including raw bus requests (`cmdraw`).
//!
//! Concurrency notes:
//! - [DeviceManager] is a cheap handle; clones share one manager. The supervisor owns one
//!   clone as a module and the application may keep others.
//! - Buses report through a [BusEventQueue] drained in [DeviceManager::service].
//!   [DeviceManager::handle_bus_elem_status] is also public and safe to call from a second
//!   context.
//! - No device method and no subscriber callback is ever invoked while the directory lock is
//!   held: callers work from [DeviceManager::get_device_list_frozen] snapshots.
//! - Lock timeouts are logged and the operation reports "nothing" (empty list, `None`,
//!   `false`); the next pass tries again. Element status changes that could not be applied
//!   because of a lock timeout are queued again for the next pass.

use alloc::{
    boxed::Box,
    format,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, Ordering};
use log::{error, info, warn};
use serde_json::{Map, Value, json};
use utils::time::Clock;

use crate::{
    api::{DataSource, DataSourceOffer, RestApiEndpoint, RestApiEndpoints},
    bus::{
        BusAddrStatus, BusEvent, BusEventQueue, BusOperationStatus, BusRegistry, RawBusRequest,
        RawBusResult, RawBusResultCb, SimBus, sim::SIM_BUS_TYPE_NAME,
    },
    config::{ConfigDoc, DeviceManagerConfig, parse_u64},
    debug_ex,
    dev::{
        BusDevice, BusNum, DeviceContext, DeviceDataChangeCb, DeviceFactory, DeviceId, DeviceRef,
        DeviceStatusChangeCb, DeviceTypeCatalog,
    },
    error::{Error, Result, RetCode},
    sched::{SysMod, module::ModuleStatusChangeCb},
};

pub mod directory;

pub use directory::{DeviceDirectory, FrozenEntry, Inserted};

/// Module name, and the config section holding [DeviceManagerConfig].
pub const DEVICE_MANAGER_NAME: &str = "DevMan";
pub const BUS_CONFIG_SECTION: &str = "Buses";
pub const DEVICE_CONFIG_SECTION: &str = "Devices";

/// The device-level REST endpoint registered by the manager.
pub const DEVMAN_ENDPOINT_NAME: &str = "devman";

/// Publishing module and topic the JSON aggregate is offered to at post-setup.
pub const DEVMAN_PUBLISHER: &str = "Publish";
pub const DEVMAN_JSON_TOPIC: &str = "devjson";

struct Inner {
    name: String,
    sys_config: ConfigDoc,
    clock: Arc<dyn Clock>,
    buses: BusRegistry,
    factory: DeviceFactory,
    type_catalog: Arc<DeviceTypeCatalog>,
    directory: DeviceDirectory,
    events: BusEventQueue,
    next_direct_addr: AtomicU32,
    status_cb: spin::Mutex<Option<ModuleStatusChangeCb>>,
    last_raw_result: Arc<spin::Mutex<Option<RawBusResult>>>,
}

#[derive(Clone)]
pub struct DeviceManager {
    inner: Arc<Inner>,
}

impl DeviceManager {
    /// A manager with the built-in bus types and device classes registered. Tuning is read
    /// from the [DEVICE_MANAGER_NAME] section of `sys_config`.
    pub fn new(sys_config: ConfigDoc, clock: Arc<dyn Clock>) -> DeviceManager {
        let config = sys_config
            .deserialize::<DeviceManagerConfig>(DEVICE_MANAGER_NAME)
            .unwrap_or_else(|err| {
                warn!("device manager config ignored: {}", err);
                DeviceManagerConfig::default()
            });
        let buses = BusRegistry::new();
        buses.register_bus_type(SIM_BUS_TYPE_NAME, SimBus::create);
        DeviceManager {
            inner: Arc::new(Inner {
                name: DEVICE_MANAGER_NAME.to_string(),
                directory: DeviceDirectory::new(
                    clock.clone(),
                    config.lock_wait_ms * 1000,
                    config.max_devices,
                ),
                sys_config,
                clock,
                buses,
                factory: DeviceFactory::with_builtin(),
                type_catalog: Arc::new(DeviceTypeCatalog::new()),
                events: BusEventQueue::new(),
                next_direct_addr: AtomicU32::new(0),
                status_cb: spin::Mutex::new(None),
                last_raw_result: Arc::new(spin::Mutex::new(None)),
            }),
        }
    }

    /// Boxed clone for [crate::sched::Supervisor::add].
    pub fn as_module(&self) -> Option<Box<dyn SysMod>> {
        Some(Box::new(self.clone()))
    }

    pub fn bus_registry(&self) -> &BusRegistry {
        &self.inner.buses
    }

    pub fn device_factory(&self) -> &DeviceFactory {
        &self.inner.factory
    }

    pub fn type_catalog(&self) -> &Arc<DeviceTypeCatalog> {
        &self.inner.type_catalog
    }

    /// The queue buses created by this manager report into.
    pub fn bus_events(&self) -> &BusEventQueue {
        &self.inner.events
    }

    fn device_context(&self) -> DeviceContext {
        DeviceContext {
            clock: self.inner.clock.clone(),
            type_catalog: self.inner.type_catalog.clone(),
        }
    }

    // region: Setup

    /// Create the configured buses and devices.
    pub fn setup(&self) {
        let inner = &self.inner;
        let num_buses = inner.buses.setup(
            BUS_CONFIG_SECTION,
            &inner.sys_config,
            inner.clock.clone(),
            inner.events.clone(),
            inner.type_catalog.clone(),
        );
        let num_devices = self.setup_devices(DEVICE_CONFIG_SECTION, &inner.sys_config);
        info!("setup {} buses, {} devices", num_buses, num_devices);
    }

    /// Create a device for each entry of the array at `prefix` whose `enable` is not false.
    ///
    /// First every device is created, given a direct-connection identifier and added to the
    /// directory; then each new device is set up and its type record, if any, is added to the
    /// type catalog. Unknown classes and failed constructions are logged and skipped.
    /// Returns the number of devices added.
    pub fn setup_devices(&self, prefix: &str, config: &ConfigDoc) -> usize {
        let ctx = self.device_context();
        let mut added: Vec<DeviceRef> = Vec::new();
        for entry in config.get_array(prefix) {
            if !entry.get_bool("enable", true) {
                continue;
            }
            let class_name = entry.get_str("class", "");
            let device = match self.inner.factory.create(&class_name, entry, &ctx) {
                Ok(device) => device,
                Err(err @ Error::UnknownDeviceClass(_)) => {
                    warn!("device skipped: {}", err);
                    continue;
                }
                Err(err) => {
                    error!("device skipped: {}", err);
                    continue;
                }
            };
            let addr = self.inner.next_direct_addr.fetch_add(1, Ordering::Relaxed);
            device.base().assign_id(DeviceId::direct(addr));
            match self.inner.directory.insert(device.clone(), true) {
                Ok(Inserted::New) => added.push(device),
                Ok(Inserted::Existing(_)) => warn!("device {} already present", device.id()),
                Err(err) => error!("device {} not added: {}", device.name(), err),
            }
        }
        for device in added.iter() {
            device.setup();
            if let Some(record) = device.device_type_record() {
                let idx = self.inner.type_catalog.add_record(record);
                device.base().set_type_index(idx);
            }
            debug_ex!("device {} class {} id {}", device.name(), device.class_name(), device.id());
        }
        added.len()
    }

    /// Post-setup every device, then hand pending data subscriptions to them.
    pub fn post_setup(&self) {
        for entry in self.get_device_list_frozen(usize::MAX, false) {
            entry.device.post_setup();
        }
        self.register_for_device_data_change_cbs(DeviceId::any());
    }

    /// Release buses and forget all devices.
    pub fn shutdown(&self) {
        self.inner.buses.deinit();
        if let Err(err) = self.inner.directory.clear() {
            warn!("device directory not cleared: {}", err);
        }
    }

    // endregion

    // region: Service

    /// Service the buses, apply the events they raised, then service every device.
    pub fn service(&self) {
        self.inner.buses.service();
        self.process_bus_events();
        for entry in self.get_device_list_frozen(usize::MAX, false) {
            entry.device.service();
        }
    }

    /// Apply every queued bus event.
    pub fn process_bus_events(&self) {
        for event in self.inner.events.drain() {
            match event {
                BusEvent::ElemStatus { bus_num, changes } => self.handle_bus_elem_status(bus_num, &changes),
                BusEvent::OperationStatus { bus_num, status } => self.handle_bus_operation_status(bus_num, status),
            }
        }
    }

    fn handle_bus_operation_status(&self, bus_num: BusNum, status: BusOperationStatus) {
        let name = self
            .inner
            .buses
            .get_bus_by_number(bus_num)
            .map(|bus| bus.name().to_string())
            .unwrap_or_default();
        info!("bus {} '{}' operation {}", bus_num, name, status.as_str());
        let cb = self.inner.status_cb.lock().clone();
        if let Some(cb) = cb {
            cb(&self.inner.name, status == BusOperationStatus::Ok);
        }
    }

    /// Apply element status changes reported by bus `bus_num`. Changes that hit a lock
    /// timeout before reaching a device are queued again for the next pass.
    pub fn handle_bus_elem_status(&self, bus_num: BusNum, changes: &[BusAddrStatus]) {
        let mut deferred = Vec::new();
        for change in changes {
            let id = DeviceId::new(bus_num, change.address);
            let existing = match self.inner.directory.find(id) {
                Ok(existing) => existing,
                Err(err) => {
                    warn!("status for {} deferred: {}", id, err);
                    deferred.push(*change);
                    continue;
                }
            };
            let device = match existing {
                Some(device) => device,
                None if change.is_newly_identified && change.has_valid_type() => {
                    match self.create_bus_device(bus_num, change) {
                        Ok(device) => device,
                        Err(err @ Error::LockTimeout { .. }) => {
                            warn!("device {} deferred: {}", id, err);
                            deferred.push(*change);
                            continue;
                        }
                        Err(err) => {
                            warn!("device {} discarded: {}", id, err);
                            continue;
                        }
                    }
                }
                None => {
                    debug_ex!("status for unknown device {} ignored", id);
                    continue;
                }
            };

            device.handle_status_change(change);
            if change.is_change {
                if let Err(err) = self
                    .inner
                    .directory
                    .set_online(id, change.online_state.is_online())
                {
                    warn!("online flag for {} not updated: {}", id, err);
                }
            }
            match self.inner.directory.status_subs_for(id) {
                Ok(subs) => {
                    for cb in subs {
                        cb(device.as_ref(), change);
                    }
                }
                Err(err) => warn!("status subscribers for {} skipped: {}", id, err),
            }
            if change.is_newly_identified {
                self.register_for_device_data_change_cbs(id);
            }
        }
        if !deferred.is_empty() {
            self.inner.events.push(BusEvent::ElemStatus {
                bus_num,
                changes: deferred,
            });
        }
    }

    /// Build, insert and set up a device for a newly identified bus element.
    fn create_bus_device(&self, bus_num: BusNum, change: &BusAddrStatus) -> Result<DeviceRef> {
        let bus = self
            .inner
            .buses
            .get_bus_by_number(bus_num)
            .ok_or(Error::UnknownBus(bus_num))?;
        let type_name = self
            .inner
            .type_catalog
            .name(change.device_type_index)
            .or_else(|| bus.devices().and_then(|d| d.device_type_name(change.address)))
            .unwrap_or_else(|| "unknown".to_string());
        let device: DeviceRef = Arc::new(BusDevice::new(
            bus,
            change.address,
            change.device_type_index,
            &type_name,
        ));
        match self
            .inner
            .directory
            .insert(device.clone(), change.online_state.is_online())?
        {
            Inserted::New => {}
            // Lost a race with another context; use the device that got in first.
            Inserted::Existing(existing) => return Ok(existing),
        }
        device.setup();
        device.post_setup();
        info!("new device {} type {} at {}", device.name(), type_name, device.id());
        Ok(device)
    }

    // endregion

    // region: Subscriptions

    /// Subscribe to data from `target` (or [DeviceId::any]). Devices that already exist are
    /// hooked immediately, later ones when they are identified.
    pub fn register_for_device_data(&self, target: DeviceId, cb: DeviceDataChangeCb, min_interval_ms: u32) -> bool {
        if let Err(err) = self.inner.directory.add_data_sub(target, cb, min_interval_ms) {
            warn!("data subscription for {} failed: {}", target, err);
            return false;
        }
        self.register_for_device_data_change_cbs(target);
        true
    }

    /// Subscribe to online/offline changes of `target` (or [DeviceId::any]).
    pub fn register_for_device_status(&self, target: DeviceId, cb: DeviceStatusChangeCb) -> bool {
        match self.inner.directory.add_status_sub(target, cb) {
            Ok(()) => true,
            Err(err) => {
                warn!("status subscription for {} failed: {}", target, err);
                false
            }
        }
    }

    /// Hand every pending data subscription to the matching devices. The pairs are collected
    /// under the directory lock; the devices are called after it is released.
    pub fn register_for_device_data_change_cbs(&self, target: DeviceId) {
        let hooks = match self.inner.directory.take_pending_data_hooks(target) {
            Ok(hooks) => hooks,
            Err(err) => {
                warn!("data subscriptions for {} not registered: {}", target, err);
                return;
            }
        };
        for hook in hooks {
            if !hook.device.register_for_device_data(hook.cb, hook.min_interval_ms) {
                debug_ex!("device {} does not report data", hook.device.id());
            }
        }
    }

    // endregion

    // region: Queries

    /// Snapshot of up to `max_count` directory entries, in directory order. Empty if the
    /// directory lock could not be taken.
    pub fn get_device_list_frozen(&self, max_count: usize, only_online: bool) -> Vec<FrozenEntry> {
        self.inner
            .directory
            .freeze(max_count, only_online)
            .unwrap_or_else(|err| {
                warn!("device list unavailable: {}", err);
                Vec::new()
            })
    }

    pub fn get_device_by_id(&self, id: DeviceId) -> Option<DeviceRef> {
        self.inner.directory.find(id).ok().flatten()
    }

    pub fn get_device_by_name(&self, name: &str) -> Option<DeviceRef> {
        self.inner.directory.find_by_name(name).ok().flatten()
    }

    /// Look a device up by identifier text (`1_48`) or, failing that, by name.
    pub fn get_device(&self, id_or_name: &str) -> Option<DeviceRef> {
        if let Ok(id) = id_or_name.parse::<DeviceId>() {
            if let Some(device) = self.get_device_by_id(id) {
                return Some(device);
            }
        }
        self.get_device_by_name(id_or_name)
    }

    /// Aggregate device data as a JSON object: each bus's queued poll data keyed by bus
    /// number, then each online direct device's status keyed by its publish type.
    /// Empty string when nothing contributed.
    pub fn get_devices_data_json(&self) -> String {
        let mut out = Map::new();
        for bus in self.inner.buses.buses() {
            let Some(devices) = bus.devices() else {
                continue;
            };
            if let Some(value) = parse_fragment(&devices.poll_responses_json()) {
                out.insert(bus.bus_num().to_string(), value);
            }
        }
        for entry in self.get_device_list_frozen(usize::MAX, true) {
            if !entry.device.id().is_direct() {
                continue;
            }
            let Some(value) = parse_fragment(&entry.device.status_json()) else {
                continue;
            };
            merge_into(&mut out, entry.device.publish_device_type(), value);
        }
        if out.is_empty() {
            String::new()
        } else {
            Value::Object(out).to_string()
        }
    }

    /// Aggregate device data as concatenated binary records: bus poll data first, then each
    /// online direct device's status. Empty when nothing contributed.
    pub fn get_devices_data_binary(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for bus in self.inner.buses.buses() {
            if let Some(devices) = bus.devices() {
                out.extend_from_slice(&devices.poll_responses_binary());
            }
        }
        for entry in self.get_device_list_frozen(usize::MAX, true) {
            if entry.device.id().is_direct() {
                out.extend_from_slice(&entry.device.status_binary());
            }
        }
        out
    }

    /// XOR of every bus's last update time and every online device's state hash, folded to
    /// two bytes. Independent of iteration order.
    pub fn get_devices_hash(&self) -> [u8; 2] {
        let bus_stamps = self
            .inner
            .buses
            .buses()
            .iter()
            .map(|bus| bus.last_status_update_ms() as u32)
            .collect::<Vec<_>>();
        let device_hashes = self
            .get_device_list_frozen(usize::MAX, true)
            .iter()
            .map(|entry| entry.device.state_hash())
            .collect::<Vec<_>>();
        fold_hash(bus_stamps.iter().chain(device_hashes.iter()).copied())
    }

    /// Type information for `type_name`, asking the named bus first and the global catalog
    /// when the bus is unknown or has no answer.
    pub fn dev_type_info_json(&self, bus_name: &str, type_name: &str) -> Option<String> {
        if let Some(bus) = self.inner.buses.get_bus_by_name(bus_name) {
            if let Some(info) = bus.devices().and_then(|d| d.dev_type_info_json(type_name)) {
                return Some(info);
            }
        }
        self.inner.type_catalog.type_info_json(type_name)
    }

    /// Publisher hooks: the message generator yields the aggregate (JSON text bytes, or binary
    /// records when `binary`), the state detector yields [DeviceManager::get_devices_hash].
    pub fn data_source(&self, binary: bool) -> DataSource {
        let gen_mgr = self.clone();
        let hash_mgr = self.clone();
        DataSource {
            msg_gen: Arc::new(move || {
                if binary {
                    gen_mgr.get_devices_data_binary()
                } else {
                    gen_mgr.get_devices_data_json().into_bytes()
                }
            }),
            state_detect: Arc::new(move || hash_mgr.get_devices_hash()),
        }
    }

    /// Outcome of the most recent `devman/cmdraw` request, once its bus has completed it.
    pub fn last_raw_result(&self) -> Option<RawBusResult> {
        self.inner.last_raw_result.lock().clone()
    }

    fn counts(&self) -> (usize, usize) {
        let all = self.get_device_list_frozen(usize::MAX, false);
        let online = all.iter().filter(|e| e.online).count();
        (all.len(), online)
    }

    /// Manager, bus and per-device debug information.
    pub fn debug_json(&self) -> String {
        let mut buses = Map::new();
        for bus in self.inner.buses.buses() {
            let debug = bus
                .devices()
                .map(|d| d.debug_json())
                .unwrap_or_else(|| bus.status_json());
            buses.insert(bus.name().to_string(), parse_fragment(&debug).unwrap_or(Value::Null));
        }
        let mut devices = Map::new();
        for entry in self.get_device_list_frozen(usize::MAX, false) {
            let debug = parse_fragment(&entry.device.debug_json()).unwrap_or(Value::Null);
            devices.insert(entry.device.id().to_string(), json!({"online": entry.online, "dbg": debug}));
        }
        json!({"buses": buses, "devices": devices}).to_string()
    }

    // endregion

    // region: REST

    /// `typeinfo/<bus>/<type>` (or `typeinfo?bus=&type=`), `devices`, and
    /// `cmdraw?bus=&addr=&hexWr=&numToRd=`.
    fn devman_request(&self, request: &str) -> String {
        let request = RequestParts::parse(request);
        let cmd = request.segment(0);
        if cmd.eq_ignore_ascii_case("typeinfo") {
            let bus_name = request.param_or_segment("bus", 1);
            let type_name = request.param_or_segment("type", 2);
            if bus_name.is_empty() {
                return fail_json("failBusMissing");
            }
            if type_name.is_empty() {
                return fail_json("failTypeMissing");
            }
            match self.dev_type_info_json(bus_name, type_name) {
                Some(info) => format!(r#"{{"rslt":"ok","devinfo":{}}}"#, info),
                None => fail_json("failTypeNotFound"),
            }
        } else if cmd.eq_ignore_ascii_case("devices") {
            let ids: Vec<String> = self
                .get_device_list_frozen(usize::MAX, false)
                .iter()
                .map(|e| e.device.id().to_string())
                .collect();
            json!({"rslt": "ok", "devices": ids}).to_string()
        } else if cmd.eq_ignore_ascii_case("cmdraw") {
            self.cmd_raw(&request)
        } else {
            fail_json("failUnknownCmd")
        }
    }

    /// Queue a raw request on a bus. The result arrives through the bus's next service step
    /// and is kept as [DeviceManager::last_raw_result].
    fn cmd_raw(&self, request: &RequestParts<'_>) -> String {
        let bus_name = request.param("bus");
        if bus_name.is_empty() {
            return fail_json("failBusMissing");
        }
        let addr_text = request.param("addr");
        if addr_text.is_empty() {
            return fail_json("failMissingAddr");
        }
        let Some(bus) = self.inner.buses.get_bus_by_name(bus_name) else {
            return fail_json("failBusNotFound");
        };
        let Some(address) = bus.string_to_addr(addr_text) else {
            return fail_json("failInvalidAddr");
        };
        let Ok(write) = hex::decode(request.param("hexWr")) else {
            return fail_json("failInvalidHex");
        };
        let num_to_read = parse_u64(request.param("numToRd")).unwrap_or(0) as usize;

        let store = self.inner.last_raw_result.clone();
        let cb: RawBusResultCb = Arc::new(move |result: &RawBusResult| {
            info!(
                "cmdraw {}_{:x} ok={} read={}",
                result.bus_num,
                result.address,
                result.ok,
                hex::encode(&result.read)
            );
            *store.lock() = Some(result.clone());
        });
        let raw = RawBusRequest {
            address,
            write,
            num_to_read,
        };
        let accepted = bus
            .devices()
            .is_some_and(|devices| devices.add_raw_request(raw, cb));
        if accepted {
            r#"{"rslt":"ok"}"#.to_string()
        } else {
            warn!("cmdraw to {} {} not accepted", bus_name, addr_text);
            r#"{"rslt":"fail"}"#.to_string()
        }
    }

    // endregion
}

fn fail_json(error: &str) -> String {
    json!({"rslt": "fail", "error": error}).to_string()
}

/// A REST request split into path segments and `?name=value&..` parameters.
struct RequestParts<'a> {
    segments: Vec<&'a str>,
    params: Vec<(&'a str, &'a str)>,
}

impl<'a> RequestParts<'a> {
    fn parse(request: &'a str) -> RequestParts<'a> {
        let (path, query) = request.split_once('?').unwrap_or((request, ""));
        RequestParts {
            segments: path.split('/').filter(|p| !p.is_empty()).collect(),
            params: query
                .split('&')
                .filter(|p| !p.is_empty())
                .map(|p| p.split_once('=').unwrap_or((p, "")))
                .collect(),
        }
    }

    fn segment(&self, idx: usize) -> &'a str {
        self.segments.get(idx).copied().unwrap_or_default()
    }

    /// Value of parameter `name`, empty when absent.
    fn param(&self, name: &str) -> &'a str {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .unwrap_or_default()
    }

    fn param_or_segment(&self, name: &str, idx: usize) -> &'a str {
        match self.param(name) {
            "" => self.segment(idx),
            value => value,
        }
    }
}

/// Parse a device or bus payload, ignoring trivial ones (`{}`, empty).
fn parse_fragment(text: &str) -> Option<Value> {
    if text.len() <= 2 {
        return None;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("device payload is not JSON: {}", err);
            None
        }
    }
}

/// Insert `value` under `key`, merging object members when the key is already taken.
fn merge_into(out: &mut Map<String, Value>, key: String, value: Value) {
    match out.get_mut(&key) {
        Some(Value::Object(existing)) if value.is_object() => {
            if let Value::Object(more) = value {
                existing.extend(more);
            }
        }
        _ => {
            out.insert(key, value);
        }
    }
}

/// Fold 32-bit stamps into two bytes by XOR of their low bytes.
pub fn fold_hash(stamps: impl Iterator<Item = u32>) -> [u8; 2] {
    stamps.fold([0u8; 2], |mut hash, stamp| {
        hash[0] ^= (stamp & 0xff) as u8;
        hash[1] ^= ((stamp >> 8) & 0xff) as u8;
        hash
    })
}

impl SysMod for DeviceManager {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn setup(&mut self) {
        DeviceManager::setup(self);
    }

    /// Registers the manager's own endpoint, then offers every device the same chance.
    fn add_rest_api_endpoints(&mut self, endpoints: &mut dyn RestApiEndpoints) {
        let mgr = self.clone();
        endpoints.add_endpoint(RestApiEndpoint {
            name: DEVMAN_ENDPOINT_NAME.to_string(),
            description: "devman/typeinfo/<bus>/<type>, devman/devices, devman/cmdraw?bus=&addr=&hexWr=&numToRd="
                .to_string(),
            handler: Arc::new(move |request: &str| mgr.devman_request(request)),
        });
        for entry in self.get_device_list_frozen(usize::MAX, false) {
            entry.device.add_rest_api_endpoints(endpoints);
        }
    }

    fn add_comms_channels(&mut self, comms: &mut dyn crate::api::CommsCore) {
        for entry in self.get_device_list_frozen(usize::MAX, false) {
            entry.device.add_comms_channels(comms);
        }
    }

    /// The JSON aggregate, for the publishing module.
    fn data_source_offers(&self) -> Vec<DataSourceOffer> {
        alloc::vec![DataSourceOffer {
            publisher: DEVMAN_PUBLISHER.to_string(),
            topic: DEVMAN_JSON_TOPIC.to_string(),
            source: self.data_source(false),
        }]
    }

    fn post_setup(&mut self) {
        DeviceManager::post_setup(self);
    }

    fn service(&mut self) {
        DeviceManager::service(self);
    }

    fn status_json(&self) -> String {
        let (num, online) = self.counts();
        let buses: Vec<Value> = self
            .inner
            .buses
            .buses()
            .iter()
            .map(|bus| json!({"name": bus.name(), "op": bus.operation_status().as_str()}))
            .collect();
        json!({"rslt": "ok", "numDevices": num, "numOnline": online, "buses": buses}).to_string()
    }

    fn debug_json(&self) -> String {
        DeviceManager::debug_json(self)
    }

    /// `{"dev": "<id or name>", ...}` is forwarded whole to that device.
    fn receive_cmd_json(&mut self, cmd_json: &str) -> RetCode {
        let Ok(cmd) = serde_json::from_str::<Value>(cmd_json) else {
            return RetCode::InvalidData;
        };
        let Some(target) = cmd.get("dev").and_then(Value::as_str) else {
            return RetCode::InvalidData;
        };
        match self.get_device(target) {
            Some(device) => device.send_cmd_json(cmd_json),
            None => RetCode::NotFound,
        }
    }

    fn named_value(&self, value_name: &str) -> Option<f64> {
        let (num, online) = self.counts();
        match value_name {
            "numDevices" => Some(num as f64),
            "numOnline" => Some(online as f64),
            _ => None,
        }
    }

    fn set_status_change_cb(&mut self, cb: ModuleStatusChangeCb) {
        *self.inner.status_cb.lock() = Some(cb);
    }

    fn notify_of_shutdown(&mut self) {
        info!("shutdown pending, {} devices", self.counts().0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StoppedClock;
    impl Clock for StoppedClock {
        fn micros(&self) -> u64 {
            1_000_000
        }
    }

    #[test]
    fn identification_during_lock_contention_is_retried() {
        let mgr = DeviceManager::new(
            ConfigDoc::new(json!({"Buses": {"buslist": [
                {"type": "sim", "name": "SIMA", "devices": [{"addr": "0x20", "type": "VCNL4040"}]}
            ]}})),
            Arc::new(StoppedClock),
        );
        mgr.setup();
        mgr.inner.directory.with_lock_held(|| mgr.service());
        assert_eq!(mgr.inner.directory.len().unwrap(), 0);
        assert_eq!(mgr.bus_events().len(), 1);

        mgr.service();
        let device = mgr.get_device_by_id(DeviceId::new(1, 0x20)).unwrap();
        assert_eq!(device.name(), "SIMA_20");
        assert_eq!(mgr.get_device_list_frozen(usize::MAX, true).len(), 1);
        assert!(mgr.bus_events().is_empty());
    }

    #[test]
    fn request_parts_split_path_and_query() {
        let req = RequestParts::parse("cmdraw/x?bus=SIMA&addr=0x20&flag");
        assert_eq!(req.segment(0), "cmdraw");
        assert_eq!(req.segment(5), "");
        assert_eq!(req.param("addr"), "0x20");
        assert_eq!(req.param("flag"), "");
        assert_eq!(req.param("nope"), "");
        assert_eq!(req.param_or_segment("bus", 1), "SIMA");
        assert_eq!(req.param_or_segment("type", 1), "x");
    }

    #[test]
    fn hash_fold_ignores_order() {
        let a = fold_hash([0x1234u32, 0xabcd, 7].into_iter());
        let b = fold_hash([7u32, 0x1234, 0xabcd].into_iter());
        assert_eq!(a, b);
        assert_eq!(a, [0x34 ^ 0xcd ^ 7, 0x12 ^ 0xab]);
        assert_eq!(fold_hash(core::iter::empty()), [0, 0]);
    }

    #[test]
    fn fragments_below_three_chars_are_skipped() {
        assert!(parse_fragment("").is_none());
        assert!(parse_fragment("{}").is_none());
        assert!(parse_fragment("{\"a\"").is_none());
        assert_eq!(parse_fragment(r#"{"a":1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn same_publish_type_merges() {
        let mut out = Map::new();
        merge_into(&mut out, "ACC".into(), json!({"0": 1}));
        merge_into(&mut out, "ACC".into(), json!({"1": 2}));
        assert_eq!(Value::Object(out), json!({"ACC": {"0": 1, "1": 2}}));
    }
}
