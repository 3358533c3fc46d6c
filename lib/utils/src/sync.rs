//! Spin lock with a bounded acquisition wait.
//!
//! [TimedSpinLock] wraps a [spin::mutex::Mutex] and adds [TimedSpinLock::try_lock_for], which
//! gives up after a deadline measured on an injected [Clock]. Callers that are serviced from a
//! cooperative loop use it so that contention degrades into a "try again next pass" result
//! rather than a stall.
//!
//! The wait is also capped by a spin count, so a clock that never advances (a stopped test
//! clock, a timer that is not yet running) still lets the call return.

use core::ops::{Deref, DerefMut};

use spin::{MutexGuard, Spin, mutex::Mutex};

use crate::time::{Clock, time_elapsed};

/// Upper bound on polling attempts for one [TimedSpinLock::try_lock_for] call.
pub const MAX_LOCK_SPINS: u32 = 100_000;

pub struct TimedSpinLock<T: ?Sized> {
    inner: Mutex<T, Spin>,
}

impl<T> TimedSpinLock<T> {
    pub const fn new(value: T) -> TimedSpinLock<T> {
        TimedSpinLock {
            inner: Mutex::new(value),
        }
    }
}

impl<T: ?Sized> TimedSpinLock<T> {
    /// Unbounded acquisition, for setup paths that run before any second context exists.
    pub fn lock(&self) -> TimedGuard<'_, T> {
        TimedGuard {
            inner: self.inner.lock(),
        }
    }

    /// Try to acquire the lock, waiting at most `wait_us` microseconds on `clock`.
    ///
    /// Returns [None] when the lock stayed contended for the whole window.
    pub fn try_lock_for(&self, clock: &dyn Clock, wait_us: u64) -> Option<TimedGuard<'_, T>> {
        if let Some(guard) = self.inner.try_lock() {
            return Some(TimedGuard { inner: guard });
        }
        let start = clock.micros();
        let mut spins: u32 = 0;
        loop {
            core::hint::spin_loop();
            if let Some(guard) = self.inner.try_lock() {
                return Some(TimedGuard { inner: guard });
            }
            spins += 1;
            if spins >= MAX_LOCK_SPINS || time_elapsed(clock.micros(), start) >= wait_us {
                return None;
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

// region: Guard

pub struct TimedGuard<'a, T: ?Sized> {
    inner: MutexGuard<'a, T>,
}

impl<T: ?Sized> Deref for TimedGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.inner.deref()
    }
}

impl<T: ?Sized> DerefMut for TimedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.deref_mut()
    }
}

// endregion

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};

    struct StoppedClock;
    impl Clock for StoppedClock {
        fn micros(&self) -> u64 {
            0
        }
    }

    struct SteppingClock(AtomicU64);
    impl Clock for SteppingClock {
        fn micros(&self) -> u64 {
            self.0.fetch_add(100, Ordering::Relaxed)
        }
    }

    #[test]
    fn uncontended_lock_is_immediate() {
        let lock = TimedSpinLock::new(5u32);
        let mut guard = lock.try_lock_for(&StoppedClock, 0).expect("free lock");
        *guard += 1;
        drop(guard);
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn contended_lock_times_out_on_clock() {
        let lock = TimedSpinLock::new(());
        let _held = lock.lock();
        let clock = SteppingClock(AtomicU64::new(0));
        assert!(lock.try_lock_for(&clock, 1000).is_none());
        assert!(clock.0.load(Ordering::Relaxed) >= 1000);
    }

    #[test]
    fn stopped_clock_still_returns() {
        let lock = TimedSpinLock::new(());
        let _held = lock.lock();
        assert!(lock.try_lock_for(&StoppedClock, 1_000_000).is_none());
    }
}
