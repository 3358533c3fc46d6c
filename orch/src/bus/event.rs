//! Bus → device manager event passing.
//!
//! Buses never call into the device manager directly. They push [BusEvent]s onto a
//! [BusEventQueue] (cloned into each bus at creation) and the manager drains it during its
//! own service step, outside any bus lock.

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};
use log::warn;
use spin::Mutex;

use super::status::{BusAddrStatus, BusOperationStatus};
use crate::dev::id::BusNum;

/// Events held before the oldest is dropped.
pub const BUS_EVENT_QUEUE_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    ElemStatus {
        bus_num: BusNum,
        changes: Vec<BusAddrStatus>,
    },
    OperationStatus {
        bus_num: BusNum,
        status: BusOperationStatus,
    },
}

/// Bounded multi-producer queue of [BusEvent]s. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct BusEventQueue {
    inner: Arc<Mutex<VecDeque<BusEvent>>>,
    capacity: usize,
}

impl Default for BusEventQueue {
    fn default() -> Self {
        BusEventQueue::with_capacity(BUS_EVENT_QUEUE_LEN)
    }
}

impl BusEventQueue {
    pub fn new() -> BusEventQueue {
        BusEventQueue::default()
    }

    pub fn with_capacity(capacity: usize) -> BusEventQueue {
        BusEventQueue {
            inner: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    /// Queue `event`, dropping the oldest event when full.
    pub fn push(&self, event: BusEvent) {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            warn!("bus event queue full, dropping oldest");
            queue.pop_front();
        }
        queue.push_back(event);
    }

    pub fn pop(&self) -> Option<BusEvent> {
        self.inner.lock().pop_front()
    }

    /// Take every queued event in arrival order.
    pub fn drain(&self) -> Vec<BusEvent> {
        self.inner.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
