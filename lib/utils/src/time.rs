//! ## Time Module
//! Monotonic time sources and wrap-safe elapsed-time arithmetic.
//!
//! Platform timers on small targets are free-running counters that wrap around, so every
//! comparison in this crate goes through [time_elapsed] / [is_timeout] instead of plain
//! subtraction.

/// A monotonic time source.
///
/// Implementations only need [Clock::micros]; the millisecond view is derived from it.
/// Values are allowed to wrap.
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary epoch.
    fn micros(&self) -> u64;

    /// Milliseconds since the same epoch as [Clock::micros].
    fn millis(&self) -> u64 {
        self.micros() / 1000
    }
}

/// Elapsed ticks between `last` and `now`, tolerant of counter wrap.
#[inline]
pub fn time_elapsed(now: u64, last: u64) -> u64 {
    now.wrapping_sub(last)
}

/// Whether at least `timeout` ticks have passed since `last`.
#[inline]
pub fn is_timeout(now: u64, last: u64, timeout: u64) -> bool {
    time_elapsed(now, last) >= timeout
}
