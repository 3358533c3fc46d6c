//! Error and result-code types shared by the orchestration layer.
//!
//! [Error] is what internal steps propagate with `?`. The public surface of the supervisor
//! and the device manager never hands it out directly: every routing or lookup call reports
//! its outcome as a value (`bool`, [Option], an empty payload or a [RetCode]) and logs the
//! underlying [Error].

use alloc::string::String;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = core::result::Result<T, Error>;

// region: Error Types

#[derive(Debug, Error)]
pub enum Error {
    /// A bounded lock wait expired.
    #[error("lock not acquired within {wait_us}us")]
    LockTimeout { wait_us: u64 },
    #[error("device directory full ({capacity} entries)")]
    DirectoryFull { capacity: usize },
    #[error("device class '{0}' is not registered")]
    UnknownDeviceClass(String),
    #[error("device class '{0}' failed to construct")]
    DeviceCreate(String),
    #[error("bus type '{0}' is not registered")]
    UnknownBusType(String),
    #[error("bus {0} is not registered")]
    UnknownBus(u32),
    #[error("bus '{name}' setup failed: {reason}")]
    BusSetup { name: String, reason: String },
    #[error("invalid device id '{0}'")]
    InvalidDeviceId(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// endregion

/// Result code returned by command routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RetCode {
    Ok = 0,
    Busy = 1,
    InvalidData = 2,
    InvalidObject = 3,
    InvalidOperation = 4,
    NotFound = 5,
    InsufficientResource = 6,
    OtherFailure = 7,
    NotImplemented = 8,
}

impl RetCode {
    pub fn is_ok(self) -> bool {
        self == RetCode::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetCode::Ok => "OK",
            RetCode::Busy => "BUSY",
            RetCode::InvalidData => "INVALID_DATA",
            RetCode::InvalidObject => "INVALID_OBJECT",
            RetCode::InvalidOperation => "INVALID_OPERATION",
            RetCode::NotFound => "NOT_FOUND",
            RetCode::InsufficientResource => "INSUFFICIENT_RESOURCE",
            RetCode::OtherFailure => "OTHER_FAILURE",
            RetCode::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

impl core::fmt::Display for RetCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
