//! Registration surfaces offered to modules and devices during setup.
//!
//! The REST router and the communications core live outside this crate; they only need to
//! accept registrations. Modules and devices receive them as `&mut dyn` during the second
//! setup phase.

use alloc::{string::String, sync::Arc, vec::Vec};

/// Handler for one REST endpoint. Receives the request path after the endpoint name.
pub type RestApiHandler = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone)]
pub struct RestApiEndpoint {
    pub name: String,
    pub description: String,
    pub handler: RestApiHandler,
}

impl core::fmt::Debug for RestApiEndpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RestApiEndpoint")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

pub trait RestApiEndpoints: Send {
    fn add_endpoint(&mut self, endpoint: RestApiEndpoint);
}

/// A message channel a module or device wants the comms core to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommsChannel {
    pub name: String,
    pub protocol: String,
}

pub trait CommsCore: Send {
    /// Returns the channel id assigned by the comms core.
    fn register_channel(&mut self, channel: CommsChannel) -> Option<u32>;
}

/// Message generator / change detector pair for a publishing module.
///
/// `msg_gen` builds the next payload (empty when there is nothing to send) and
/// `state_detect` returns a short signature the publisher compares between passes to decide
/// whether to publish at all.
#[derive(Clone)]
pub struct DataSource {
    pub msg_gen: Arc<dyn Fn() -> Vec<u8> + Send + Sync>,
    pub state_detect: Arc<dyn Fn() -> [u8; 2] + Send + Sync>,
}

/// A [DataSource] a module wants handed to the publishing module `publisher` under `topic`.
#[derive(Clone)]
pub struct DataSourceOffer {
    pub publisher: String,
    pub topic: String,
    pub source: DataSource,
}
