//! Buses: transports over which addressable devices are reached.
//!
//! Responsibilities:
//! - Provide the [Bus] trait implemented by every transport and the optional
//!   [BusDevicesIf] capability for buses that can enumerate the devices on them.
//! - Provide the [BusRegistry] that maps bus type names to factories and owns the live
//!   bus instances created from configuration.
//!
//! Buses report element presence and their own health by pushing [BusEvent]s onto the
//! [BusEventQueue] handed to them in their [BusContext].

use alloc::{string::String, sync::Arc, vec::Vec};
use core::any::Any;
use utils::time::Clock;

use crate::{
    config::{ConfigDoc, parse_u64},
    dev::{
        device::DeviceDataChangeCb,
        id::{BusElemAddr, BusNum},
        types::DeviceTypeCatalog,
    },
    error::Result,
};

pub mod event;
pub mod registry;
pub mod sim;
pub mod status;

pub use event::{BusEvent, BusEventQueue};
pub use registry::BusRegistry;
pub use sim::SimBus;
pub use status::{BusAddrStatus, BusOperationStatus, DeviceOnlineState};

/// Everything a bus factory gets to build a bus.
#[derive(Clone)]
pub struct BusContext {
    pub bus_num: BusNum,
    /// The bus's own entry from the bus list.
    pub config: ConfigDoc,
    pub clock: Arc<dyn Clock>,
    pub events: BusEventQueue,
    pub type_catalog: Arc<DeviceTypeCatalog>,
}

/// A raw write-then-read at one bus address, bypassing any device driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBusRequest {
    pub address: BusElemAddr,
    pub write: Vec<u8>,
    pub num_to_read: usize,
}

/// Outcome of a [RawBusRequest]. `read` is empty when `ok` is false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBusResult {
    pub bus_num: BusNum,
    pub address: BusElemAddr,
    pub ok: bool,
    pub read: Vec<u8>,
}

pub type RawBusResultCb = Arc<dyn Fn(&RawBusResult) + Send + Sync>;

/// Creates and sets up a bus. An `Err` means the bus is not added.
pub type BusFactory = fn(BusContext) -> Result<Arc<dyn Bus>>;

pub trait Bus: Send + Sync {
    fn bus_num(&self) -> BusNum;
    fn name(&self) -> &str;
    fn type_name(&self) -> &str;

    /// One bounded slice of bus work. Called once per registry service pass.
    fn service(&self);
    /// Release the hardware. Called once at registry teardown.
    fn close(&self) {}

    fn operation_status(&self) -> BusOperationStatus;
    /// Time of the last element status change or data update.
    fn last_status_update_ms(&self) -> u64 {
        0
    }
    fn status_json(&self) -> String {
        "{}".into()
    }

    fn devices(&self) -> Option<&dyn BusDevicesIf> {
        None
    }

    /// Address text as used in requests: `0x` hex or decimal.
    fn string_to_addr(&self, text: &str) -> Option<BusElemAddr> {
        parse_u64(text).and_then(|a| BusElemAddr::try_from(a).ok())
    }

    fn as_any(&self) -> &dyn Any;
}

/// Device enumeration and data access for buses that support it.
pub trait BusDevicesIf {
    fn device_addresses(&self, only_online: bool) -> Vec<BusElemAddr>;
    fn device_type_name(&self, address: BusElemAddr) -> Option<String>;

    /// Data queued since the last call, as a JSON object keyed by hex address.
    /// `{}` when nothing is queued.
    fn poll_responses_json(&self) -> String;
    /// Data queued since the last call, as binary records.
    fn poll_responses_binary(&self) -> Vec<u8>;

    fn register_for_device_data(&self, address: BusElemAddr, cb: DeviceDataChangeCb, min_interval_ms: u32) -> bool;

    fn dev_type_info_json(&self, type_name: &str) -> Option<String>;

    /// Queue a raw request. `cb` gets the outcome from a later service step. Returns false
    /// when the request is not accepted.
    fn add_raw_request(&self, _request: RawBusRequest, _cb: RawBusResultCb) -> bool {
        false
    }

    fn debug_json(&self) -> String {
        "{}".into()
    }
}
