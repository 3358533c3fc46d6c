//! The device directory and subscriber lists.
//!
//! Responsibilities:
//! - Keep the append-only, capacity-bounded list of (device, online flag) entries.
//! - Keep the data-change and status-change subscriber lists.
//! - Hand out owned snapshots so callers never hold the lock while calling into a device
//!   or a subscriber.
//!
//! Concurrency notes:
//! - All three lists sit behind one [TimedSpinLock]. Every accessor waits at most the
//!   configured time and returns [Error::LockTimeout] rather than blocking.
//! - Entries are never removed while the directory is live, so a [DeviceRef] from a snapshot
//!   always names a device that is still in the directory.

use alloc::{sync::Arc, vec::Vec};
use utils::{
    sync::{TimedGuard, TimedSpinLock},
    time::Clock,
};

use crate::{
    dev::{DeviceDataChangeCb, DeviceId, DeviceRef, DeviceStatusChangeCb},
    error::{Error, Result},
};

/// One directory entry as seen through a frozen snapshot.
#[derive(Clone)]
pub struct FrozenEntry {
    pub device: DeviceRef,
    pub online: bool,
}

impl core::fmt::Debug for FrozenEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrozenEntry")
            .field("id", &self.device.id())
            .field("name", &self.device.name())
            .field("online", &self.online)
            .finish()
    }
}

struct DataSub {
    target: DeviceId,
    cb: DeviceDataChangeCb,
    min_interval_ms: u32,
    /// Devices this subscription has already been handed to.
    hooked: Vec<DeviceId>,
}

struct StatusSub {
    target: DeviceId,
    cb: DeviceStatusChangeCb,
}

#[derive(Default)]
struct DirectoryState {
    entries: Vec<FrozenEntry>,
    data_subs: Vec<DataSub>,
    status_subs: Vec<StatusSub>,
}

/// Outcome of [DeviceDirectory::insert].
pub enum Inserted {
    New,
    /// A device with the same identifier was already present; the candidate was not added.
    Existing(DeviceRef),
}

/// A data subscription paired with a device it has not been handed to yet.
pub struct PendingDataHook {
    pub device: DeviceRef,
    pub cb: DeviceDataChangeCb,
    pub min_interval_ms: u32,
}

pub struct DeviceDirectory {
    state: TimedSpinLock<DirectoryState>,
    clock: Arc<dyn Clock>,
    wait_us: u64,
    capacity: usize,
}

impl DeviceDirectory {
    pub fn new(clock: Arc<dyn Clock>, wait_us: u64, capacity: usize) -> DeviceDirectory {
        DeviceDirectory {
            state: TimedSpinLock::new(DirectoryState::default()),
            clock,
            wait_us,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> Result<TimedGuard<'_, DirectoryState>> {
        self.state
            .try_lock_for(self.clock.as_ref(), self.wait_us)
            .ok_or(Error::LockTimeout {
                wait_us: self.wait_us,
            })
    }

    // region: Entries

    /// Append `device` unless a device with the same valid identifier is already present.
    pub fn insert(&self, device: DeviceRef, online: bool) -> Result<Inserted> {
        let mut state = self.lock()?;
        let id = device.id();
        if id.is_valid() {
            if let Some(existing) = state.entries.iter().find(|e| e.device.id_matches(id)) {
                return Ok(Inserted::Existing(existing.device.clone()));
            }
        }
        if state.entries.len() >= self.capacity {
            return Err(Error::DirectoryFull {
                capacity: self.capacity,
            });
        }
        state.entries.push(FrozenEntry { device, online });
        Ok(Inserted::New)
    }

    pub fn find(&self, id: DeviceId) -> Result<Option<DeviceRef>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .find(|e| e.device.id_matches(id))
            .map(|e| e.device.clone()))
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<DeviceRef>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .find(|e| e.device.name() == name)
            .map(|e| e.device.clone()))
    }

    /// Update the cached online flag. Returns whether the device was found.
    pub fn set_online(&self, id: DeviceId, online: bool) -> Result<bool> {
        let mut state = self.lock()?;
        match state.entries.iter_mut().find(|e| e.device.id_matches(id)) {
            Some(entry) => {
                entry.online = online;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Copy up to `max_count` entries, optionally only the online ones, in directory order.
    pub fn freeze(&self, max_count: usize, only_online: bool) -> Result<Vec<FrozenEntry>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .filter(|e| !only_online || e.online)
            .take(max_count)
            .cloned()
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }

    /// Drop every entry and subscription. Only for shutdown, when no snapshot is in use.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.entries.clear();
        state.data_subs.clear();
        state.status_subs.clear();
        Ok(())
    }

    /// Run `f` while another context holds the directory lock.
    #[cfg(test)]
    pub(super) fn with_lock_held<R>(&self, f: impl FnOnce() -> R) -> R {
        let _held = self.state.lock();
        f()
    }

    // endregion

    // region: Subscriptions

    pub fn add_data_sub(&self, target: DeviceId, cb: DeviceDataChangeCb, min_interval_ms: u32) -> Result<()> {
        self.lock()?.data_subs.push(DataSub {
            target,
            cb,
            min_interval_ms,
            hooked: Vec::new(),
        });
        Ok(())
    }

    pub fn add_status_sub(&self, target: DeviceId, cb: DeviceStatusChangeCb) -> Result<()> {
        self.lock()?.status_subs.push(StatusSub { target, cb });
        Ok(())
    }

    /// Status subscribers interested in `id`.
    pub fn status_subs_for(&self, id: DeviceId) -> Result<Vec<DeviceStatusChangeCb>> {
        let state = self.lock()?;
        Ok(state
            .status_subs
            .iter()
            .filter(|s| s.target.covers(id))
            .map(|s| s.cb.clone())
            .collect())
    }

    /// Pair every data subscription with each matching device (restricted to `filter`) it
    /// has not been handed to yet, and mark those pairs as handed over.
    pub fn take_pending_data_hooks(&self, filter: DeviceId) -> Result<Vec<PendingDataHook>> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let mut pending = Vec::new();
        for sub in state.data_subs.iter_mut() {
            for entry in state.entries.iter() {
                let id = entry.device.id();
                if !filter.covers(id) || !sub.target.covers(id) || sub.hooked.contains(&id) {
                    continue;
                }
                sub.hooked.push(id);
                pending.push(PendingDataHook {
                    device: entry.device.clone(),
                    cb: sub.cb.clone(),
                    min_interval_ms: sub.min_interval_ms,
                });
            }
        }
        Ok(pending)
    }

    pub fn num_data_subs(&self) -> Result<usize> {
        Ok(self.lock()?.data_subs.len())
    }

    // endregion
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::{Device, DeviceBase};
    use alloc::format;

    struct Zero;
    impl Clock for Zero {
        fn micros(&self) -> u64 {
            0
        }
    }

    struct Dummy(DeviceBase);
    impl Device for Dummy {
        fn base(&self) -> &DeviceBase {
            &self.0
        }
    }

    fn dev(bus: u32, addr: u32) -> DeviceRef {
        let d = Dummy(DeviceBase::with_names("Dummy", "Dummy", &format!("d{}_{}", bus, addr)));
        d.0.assign_id(DeviceId::new(bus, addr));
        Arc::new(d)
    }

    fn dir(capacity: usize) -> DeviceDirectory {
        DeviceDirectory::new(Arc::new(Zero), 1000, capacity)
    }

    #[test]
    fn insert_rejects_duplicates_and_overflow() {
        let d = dir(2);
        assert!(matches!(d.insert(dev(1, 1), true), Ok(Inserted::New)));
        assert!(matches!(d.insert(dev(1, 1), false), Ok(Inserted::Existing(_))));
        assert!(matches!(d.insert(dev(1, 2), false), Ok(Inserted::New)));
        assert!(matches!(d.insert(dev(1, 3), false), Err(Error::DirectoryFull { capacity: 2 })));
        assert_eq!(d.len().unwrap(), 2);
    }

    #[test]
    fn freeze_filters_and_caps() {
        let d = dir(10);
        for addr in 0..5 {
            d.insert(dev(1, addr), addr % 2 == 0).ok();
        }
        let all = d.freeze(usize::MAX, false).unwrap();
        let online = d.freeze(usize::MAX, true).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(online.len(), 3);
        assert!(online.iter().all(|e| e.online));
        assert_eq!(d.freeze(2, false).unwrap().len(), 2);
        assert!(d.set_online(DeviceId::new(1, 1), true).unwrap());
        assert!(!d.set_online(DeviceId::new(9, 9), true).unwrap());
        assert_eq!(d.freeze(usize::MAX, true).unwrap().len(), 4);
        assert_eq!(d.find_by_name("d1_3").unwrap().unwrap().id(), DeviceId::new(1, 3));
    }

    #[test]
    fn held_lock_degrades_to_timeout() {
        let d = dir(4);
        d.with_lock_held(|| {
            assert!(matches!(d.freeze(10, false), Err(Error::LockTimeout { .. })));
            assert!(d.insert(dev(1, 1), true).is_err());
            assert!(d.clear().is_err());
        });
        d.insert(dev(1, 1), true).unwrap();
        d.clear().unwrap();
        assert_eq!(d.len().unwrap(), 0);
    }

    #[test]
    fn data_hooks_are_handed_out_once() {
        let d = dir(10);
        d.insert(dev(1, 1), true).ok();
        d.insert(dev(1, 2), true).ok();
        let cb: DeviceDataChangeCb = Arc::new(|_: u16, _: &[u8]| {});
        d.add_data_sub(DeviceId::any(), cb.clone(), 0).unwrap();
        d.add_data_sub(DeviceId::new(1, 2), cb, 10).unwrap();
        assert_eq!(d.take_pending_data_hooks(DeviceId::new(1, 2)).unwrap().len(), 2);
        assert_eq!(d.take_pending_data_hooks(DeviceId::any()).unwrap().len(), 1);
        assert!(d.take_pending_data_hooks(DeviceId::any()).unwrap().is_empty());
        d.insert(dev(2, 7), true).ok();
        let late = d.take_pending_data_hooks(DeviceId::any()).unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].device.id(), DeviceId::new(2, 7));
    }
}
