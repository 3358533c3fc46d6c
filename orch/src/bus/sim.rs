//! Simulated bus.
//!
//! Configured with a list of elements (`devices: [{"addr": "0x20", "type": "VCNL4040"}]`),
//! it behaves like a scanning bus: present elements are identified on the next service
//! step, each online element produces a poll sample every `pollMs`, and elements can be
//! plugged, unplugged or hot-added at runtime. Used on hosts without bus hardware and in
//! tests.
//!
//! Each element also has a bank of 256 byte registers for raw requests: the first written
//! byte selects the register, the remaining bytes are stored from there, and the read
//! starts at the selected register. Raw requests complete on the next service step.

use alloc::{
    format,
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};
use core::any::Any;
use serde_json::{Map, Value, json};
use spin::Mutex;
use utils::{
    endian::BigEndianWriter,
    time::{Clock, is_timeout},
};

use super::{
    Bus, BusAddrStatus, BusContext, BusDevicesIf, BusEvent, BusEventQueue, BusOperationStatus,
    DeviceOnlineState, RawBusRequest, RawBusResult, RawBusResultCb,
};
use crate::{
    dev::{
        binary::gen_binary_data_msg,
        device::DeviceDataChangeCb,
        id::{BusElemAddr, BusNum},
        types::{DEVICE_TYPE_INDEX_INVALID, DeviceTypeCatalog, DeviceTypeIndex, DeviceTypeRecord},
    },
    error::Result,
};

pub const SIM_BUS_TYPE_NAME: &str = "sim";
const DEFAULT_POLL_MS: u64 = 100;
const REG_BANK_LEN: usize = 256;

struct DataSub {
    cb: DeviceDataChangeCb,
    min_interval_ms: u64,
    last_report_ms: Option<u64>,
}

struct SimElem {
    address: BusElemAddr,
    type_name: String,
    type_index: DeviceTypeIndex,
    present: bool,
    state: DeviceOnlineState,
    identified: bool,
    poll_ms: u64,
    last_poll_ms: Option<u64>,
    sample_count: u16,
    queued: Option<Vec<u8>>,
    subs: Vec<DataSub>,
    regs: [u8; REG_BANK_LEN],
}

impl SimElem {
    /// Apply a raw request to the register bank and return the bytes read.
    fn raw_access(&mut self, request: &RawBusRequest) -> Vec<u8> {
        let start = request.write.first().copied().unwrap_or(0) as usize;
        for (i, byte) in request.write.iter().skip(1).enumerate() {
            self.regs[(start + i) % REG_BANK_LEN] = *byte;
        }
        (0..request.num_to_read.min(REG_BANK_LEN))
            .map(|i| self.regs[(start + i) % REG_BANK_LEN])
            .collect()
    }
}

#[derive(Default)]
struct SimState {
    elems: Vec<SimElem>,
    failing: bool,
    op_status: BusOperationStatus,
    last_status_update_ms: u64,
    raw_pending: Vec<(RawBusRequest, RawBusResultCb)>,
}

pub struct SimBus {
    bus_num: BusNum,
    name: String,
    clock: Arc<dyn Clock>,
    events: BusEventQueue,
    type_catalog: Arc<DeviceTypeCatalog>,
    state: Mutex<SimState>,
}

impl SimBus {
    /// [super::BusFactory] for the `sim` bus type.
    pub fn create(ctx: BusContext) -> Result<Arc<dyn Bus>> {
        let bus = SimBus {
            bus_num: ctx.bus_num,
            name: ctx.config.get_str("name", SIM_BUS_TYPE_NAME),
            clock: ctx.clock,
            events: ctx.events,
            type_catalog: ctx.type_catalog,
            state: Mutex::new(SimState::default()),
        };
        let default_poll_ms = ctx.config.get_u64("pollMs", DEFAULT_POLL_MS);
        for elem in ctx.config.get_array("devices") {
            let address = elem.get_u64("addr", 0) as BusElemAddr;
            let type_name = elem.get_str("type", "");
            bus.add_element(address, &type_name, elem.get_u64("pollMs", default_poll_ms));
        }
        Ok(Arc::new(bus))
    }

    /// Add an element, present from the next service step. Returns false if the address is
    /// already in use.
    pub fn add_element(&self, address: BusElemAddr, type_name: &str, poll_ms: u64) -> bool {
        let mut state = self.state.lock();
        if state.elems.iter().any(|e| e.address == address) {
            return false;
        }
        let type_index = if type_name.is_empty() {
            DEVICE_TYPE_INDEX_INVALID
        } else {
            self.type_catalog.add_record(DeviceTypeRecord::named(type_name))
        };
        state.elems.push(SimElem {
            address,
            type_name: type_name.to_string(),
            type_index,
            present: true,
            state: DeviceOnlineState::Initial,
            identified: false,
            poll_ms,
            last_poll_ms: None,
            sample_count: 0,
            queued: None,
            subs: Vec::new(),
            regs: [0; REG_BANK_LEN],
        });
        true
    }

    /// Plug or unplug an element. Takes effect on the next service step.
    pub fn set_present(&self, address: BusElemAddr, present: bool) -> bool {
        let mut state = self.state.lock();
        match state.elems.iter_mut().find(|e| e.address == address) {
            Some(elem) => {
                elem.present = present;
                true
            }
            None => false,
        }
    }

    /// A failing bus reports every element offline until it recovers.
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().failing = failing;
    }

    pub fn from_bus(bus: &dyn Bus) -> Option<&SimBus> {
        bus.as_any().downcast_ref::<SimBus>()
    }
}

/// Poll sample: 16-bit timestamp then 16-bit sample counter, big-endian.
fn poll_sample(now_ms: u64, count: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(4);
    data.put_u16_be((now_ms & 0xffff) as u16);
    data.put_u16_be(count);
    data
}

impl Bus for SimBus {
    fn bus_num(&self) -> BusNum {
        self.bus_num
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &str {
        SIM_BUS_TYPE_NAME
    }

    fn service(&self) {
        let now = self.clock.millis();
        let mut changes = Vec::new();
        let mut reports: Vec<(DeviceDataChangeCb, DeviceTypeIndex, Vec<u8>)> = Vec::new();
        let mut raw_results: Vec<(RawBusResultCb, RawBusResult)> = Vec::new();
        let op_change;
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let op = if state.failing {
                BusOperationStatus::Failing
            } else {
                BusOperationStatus::Ok
            };
            op_change = (op != state.op_status).then_some(op);
            state.op_status = op;

            for elem in state.elems.iter_mut() {
                let reachable = elem.present && !state.failing;
                if reachable && elem.state != DeviceOnlineState::Online {
                    let mut status = BusAddrStatus::transition(elem.address, DeviceOnlineState::Online);
                    status.is_newly_identified = !elem.identified;
                    status.device_type_index = elem.type_index;
                    elem.identified = true;
                    elem.state = DeviceOnlineState::Online;
                    changes.push(status);
                    state.last_status_update_ms = now;
                } else if !reachable && elem.state == DeviceOnlineState::Online {
                    elem.state = DeviceOnlineState::Offline;
                    let mut status = BusAddrStatus::transition(elem.address, DeviceOnlineState::Offline);
                    status.device_type_index = elem.type_index;
                    changes.push(status);
                    state.last_status_update_ms = now;
                }

                if elem.state != DeviceOnlineState::Online {
                    continue;
                }
                let due = elem
                    .last_poll_ms
                    .is_none_or(|last| is_timeout(now, last, elem.poll_ms));
                if !due {
                    continue;
                }
                elem.last_poll_ms = Some(now);
                elem.sample_count = elem.sample_count.wrapping_add(1);
                let data = poll_sample(now, elem.sample_count);
                state.last_status_update_ms = now;
                for sub in elem.subs.iter_mut() {
                    let report = sub
                        .last_report_ms
                        .is_none_or(|last| is_timeout(now, last, sub.min_interval_ms));
                    if report {
                        sub.last_report_ms = Some(now);
                        reports.push((sub.cb.clone(), elem.type_index, data.clone()));
                    }
                }
                elem.queued = Some(data);
            }

            for (request, cb) in core::mem::take(&mut state.raw_pending) {
                let elem = state.elems.iter_mut().find(|e| e.address == request.address);
                let read = match elem {
                    Some(elem) if elem.present && !state.failing => Some(elem.raw_access(&request)),
                    _ => None,
                };
                raw_results.push((
                    cb,
                    RawBusResult {
                        bus_num: self.bus_num,
                        address: request.address,
                        ok: read.is_some(),
                        read: read.unwrap_or_default(),
                    },
                ));
            }
        }

        if let Some(status) = op_change {
            self.events.push(BusEvent::OperationStatus {
                bus_num: self.bus_num,
                status,
            });
        }
        if !changes.is_empty() {
            self.events.push(BusEvent::ElemStatus {
                bus_num: self.bus_num,
                changes,
            });
        }
        for (cb, type_index, data) in reports {
            cb(type_index, &data);
        }
        for (cb, result) in raw_results {
            cb(&result);
        }
    }

    fn operation_status(&self) -> BusOperationStatus {
        self.state.lock().op_status
    }

    fn last_status_update_ms(&self) -> u64 {
        self.state.lock().last_status_update_ms
    }

    fn status_json(&self) -> String {
        let state = self.state.lock();
        json!({
            "name": self.name,
            "num": self.bus_num,
            "op": state.op_status.as_str(),
            "online": state.elems.iter().filter(|e| e.state.is_online()).count(),
        })
        .to_string()
    }

    fn devices(&self) -> Option<&dyn BusDevicesIf> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl BusDevicesIf for SimBus {
    fn device_addresses(&self, only_online: bool) -> Vec<BusElemAddr> {
        self.state
            .lock()
            .elems
            .iter()
            .filter(|e| e.identified && (!only_online || e.state.is_online()))
            .map(|e| e.address)
            .collect()
    }

    fn device_type_name(&self, address: BusElemAddr) -> Option<String> {
        self.state
            .lock()
            .elems
            .iter()
            .find(|e| e.address == address)
            .map(|e| e.type_name.clone())
    }

    fn poll_responses_json(&self) -> String {
        let mut state = self.state.lock();
        let mut out = Map::new();
        for elem in state.elems.iter_mut() {
            if let Some(data) = elem.queued.take() {
                out.insert(
                    format!("{:x}", elem.address),
                    json!({"x": hex::encode(&data), "_t": elem.type_name}),
                );
            }
        }
        Value::Object(out).to_string()
    }

    fn poll_responses_binary(&self) -> Vec<u8> {
        let mut state = self.state.lock();
        let mut out = Vec::new();
        for elem in state.elems.iter_mut() {
            if let Some(data) = elem.queued.take() {
                gen_binary_data_msg(
                    &mut out,
                    self.bus_num,
                    elem.address,
                    elem.type_index,
                    elem.state.is_online(),
                    elem.state == DeviceOnlineState::PendingDeletion,
                    &data,
                );
            }
        }
        out
    }

    fn register_for_device_data(&self, address: BusElemAddr, cb: DeviceDataChangeCb, min_interval_ms: u32) -> bool {
        let mut state = self.state.lock();
        match state.elems.iter_mut().find(|e| e.address == address) {
            Some(elem) => {
                elem.subs.push(DataSub {
                    cb,
                    min_interval_ms: min_interval_ms as u64,
                    last_report_ms: None,
                });
                true
            }
            None => false,
        }
    }

    fn dev_type_info_json(&self, type_name: &str) -> Option<String> {
        self.type_catalog.type_info_json(type_name)
    }

    /// Accepted for any configured element, present or not; an absent one completes with
    /// `ok == false`.
    fn add_raw_request(&self, request: RawBusRequest, cb: RawBusResultCb) -> bool {
        let mut state = self.state.lock();
        if !state.elems.iter().any(|e| e.address == request.address) {
            return false;
        }
        state.raw_pending.push((request, cb));
        true
    }

    fn debug_json(&self) -> String {
        let state = self.state.lock();
        let elems: Vec<Value> = state
            .elems
            .iter()
            .map(|e| {
                json!({
                    "a": format!("{:x}", e.address),
                    "t": e.type_name,
                    "s": e.state.as_str(),
                    "n": e.sample_count,
                })
            })
            .collect();
        json!({"name": self.name, "elems": elems}).to_string()
    }
}
