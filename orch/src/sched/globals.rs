//! A handful of integers any module can set and the supervisor can report, for ad-hoc
//! instrumentation on targets without a debugger.

use alloc::{string::String, vec::Vec};
use core::sync::atomic::{AtomicI32, Ordering};

pub const NUM_DEBUG_GLOBALS: usize = 5;

#[derive(Debug, Default)]
pub struct DebugGlobals {
    values: [AtomicI32; NUM_DEBUG_GLOBALS],
}

impl DebugGlobals {
    pub fn new() -> DebugGlobals {
        DebugGlobals::default()
    }

    /// Out-of-range indices are ignored.
    pub fn set(&self, idx: usize, value: i32) {
        if let Some(slot) = self.values.get(idx) {
            slot.store(value, Ordering::Relaxed);
        }
    }

    pub fn get(&self, idx: usize) -> Option<i32> {
        self.values.get(idx).map(|slot| slot.load(Ordering::Relaxed))
    }

    /// `[v0,v1,v2,v3,v4]`
    pub fn to_json(&self) -> String {
        let vals: Vec<i32> = self.values.iter().map(|v| v.load(Ordering::Relaxed)).collect();
        serde_json::to_string(&vals).unwrap_or_default()
    }
}
