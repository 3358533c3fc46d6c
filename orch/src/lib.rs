//! Cooperative module supervisor and bus/device orchestration for single-core targets.
//!
//! The crate is split the same way the runtime is layered:
//! - [sched] runs registered system modules round-robin and supervises their execution time.
//! - [bus] holds the registry of bus types and the live bus instances created from config.
//! - [dev] defines the device capability trait and the concrete device kinds.
//! - [devman] owns the device directory, reacts to bus events and aggregates device data.
//!
//! Nothing here is a process-wide singleton: the clock, the platform hooks and the
//! registries are constructed by the application and handed in.
#![no_std]
extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod api;
pub mod bus;
pub mod config;
pub mod dev;
pub mod devman;
pub mod error;
pub mod logging;
pub mod platform;
pub mod sched;

pub use error::{Error, Result, RetCode};
pub use utils::time::Clock;
