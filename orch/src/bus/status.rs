//! Presence and operational status reported by buses.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::dev::{
    id::BusElemAddr,
    types::{DEVICE_TYPE_INDEX_INVALID, DeviceTypeIndex},
};

/// Presence of one bus element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DeviceOnlineState {
    #[default]
    Initial = 0,
    Online = 1,
    Offline = 2,
    PendingDeletion = 3,
}

impl DeviceOnlineState {
    pub fn is_online(self) -> bool {
        self == DeviceOnlineState::Online
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceOnlineState::Initial => "initial",
            DeviceOnlineState::Online => "online",
            DeviceOnlineState::Offline => "offline",
            DeviceOnlineState::PendingDeletion => "pendingDeletion",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusOperationStatus {
    #[default]
    Unknown,
    Ok,
    Failing,
}

impl BusOperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BusOperationStatus::Unknown => "unknown",
            BusOperationStatus::Ok => "ok",
            BusOperationStatus::Failing => "failing",
        }
    }
}

/// One element status change reported by a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusAddrStatus {
    pub address: BusElemAddr,
    pub online_state: DeviceOnlineState,
    /// The state actually transitioned (as opposed to a repeated report).
    pub is_change: bool,
    /// First positive identification of the element since the bus started.
    pub is_newly_identified: bool,
    pub device_type_index: DeviceTypeIndex,
}

impl BusAddrStatus {
    /// A non-transition report with no resolved type.
    pub fn new(address: BusElemAddr, online_state: DeviceOnlineState) -> BusAddrStatus {
        BusAddrStatus {
            address,
            online_state,
            is_change: false,
            is_newly_identified: false,
            device_type_index: DEVICE_TYPE_INDEX_INVALID,
        }
    }

    /// An element identified for the first time, now online.
    pub fn identified(address: BusElemAddr, device_type_index: DeviceTypeIndex) -> BusAddrStatus {
        BusAddrStatus {
            address,
            online_state: DeviceOnlineState::Online,
            is_change: true,
            is_newly_identified: true,
            device_type_index,
        }
    }

    /// A transition of an already known element.
    pub fn transition(address: BusElemAddr, online_state: DeviceOnlineState) -> BusAddrStatus {
        BusAddrStatus {
            is_change: true,
            ..BusAddrStatus::new(address, online_state)
        }
    }

    pub fn has_valid_type(&self) -> bool {
        self.device_type_index != DEVICE_TYPE_INDEX_INVALID
    }
}
