//! Device identifiers.

use alloc::{format, string::String, string::ToString};
use core::{fmt, str::FromStr};

use crate::{config::parse_u64, error::Error};

pub type BusNum = u32;
pub type BusElemAddr = u32;

/// Devices configured directly rather than discovered on a bus.
pub const BUS_NUM_DIRECT_CONN: BusNum = 0;
/// Buses are numbered from here in creation order.
pub const BUS_NUM_FIRST_BUS: BusNum = 1;
/// Wildcard: matches every device on every bus.
pub const BUS_NUM_ALL_DEVICES_ANY_BUS: BusNum = u32::MAX;
pub const BUS_NUM_INVALID: BusNum = u32::MAX - 1;

/// (bus number, address) pair naming one device.
///
/// Ordering is by bus, then address. Text form is `<bus>_<hexaddr>` or `ANY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId {
    bus_num: BusNum,
    address: BusElemAddr,
}

impl DeviceId {
    pub const fn new(bus_num: BusNum, address: BusElemAddr) -> DeviceId {
        DeviceId { bus_num, address }
    }

    pub const fn any() -> DeviceId {
        DeviceId::new(BUS_NUM_ALL_DEVICES_ANY_BUS, 0)
    }

    pub const fn invalid() -> DeviceId {
        DeviceId::new(BUS_NUM_INVALID, 0)
    }

    pub const fn direct(address: BusElemAddr) -> DeviceId {
        DeviceId::new(BUS_NUM_DIRECT_CONN, address)
    }

    pub fn bus_num(&self) -> BusNum {
        self.bus_num
    }

    pub fn address(&self) -> BusElemAddr {
        self.address
    }

    pub fn is_any(&self) -> bool {
        self.bus_num == BUS_NUM_ALL_DEVICES_ANY_BUS
    }

    pub fn is_valid(&self) -> bool {
        self.bus_num != BUS_NUM_INVALID
    }

    pub fn is_direct(&self) -> bool {
        self.bus_num == BUS_NUM_DIRECT_CONN
    }

    /// Whether a subscription or query for `self` covers the device `other`.
    pub fn covers(&self, other: DeviceId) -> bool {
        self.is_any() || *self == other
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        DeviceId::invalid()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            f.write_str("ANY")
        } else {
            write!(f, "{}_{:x}", self.bus_num, self.address)
        }
    }
}

impl FromStr for DeviceId {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("ANY") {
            return Ok(DeviceId::any());
        }
        let bad = || Error::InvalidDeviceId(text.to_string());
        let (bus, addr) = text.split_once('_').ok_or_else(bad)?;
        let bus_num: BusNum = bus.parse().map_err(|_| bad())?;
        let addr = if addr.starts_with("0x") || addr.starts_with("0X") {
            parse_u64(addr)
        } else {
            u64::from_str_radix(addr, 16).ok()
        };
        let address = addr
            .and_then(|a| BusElemAddr::try_from(a).ok())
            .ok_or_else(bad)?;
        Ok(DeviceId::new(bus_num, address))
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> String {
        format!("{}", id)
    }
}
