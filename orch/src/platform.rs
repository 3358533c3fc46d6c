//! Platform hooks the orchestration layer needs from its host.

#[cfg(feature = "std")]
use utils::time::Clock;

/// Services provided by the board support layer.
pub trait Platform: Send + Sync {
    /// Restart the system. On hardware this does not return.
    fn restart(&self);
}

/// Clock backed by [std::time::Instant], for hosted builds.
#[cfg(feature = "std")]
pub struct StdClock {
    start: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    pub fn new() -> StdClock {
        StdClock {
            start: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}
