//! Execution timing for the supervisor.
//!
//! [ExecTimer] tracks one module's worst service time in the current window.
//! [SupervisorStats] holds one timer per module plus outer-loop timing, ranks the slowest
//! modules and renders the summary reported by the supervisor.

use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::fmt::Write;

use utils::time::time_elapsed;

/// How many of the slowest modules the summary lists.
pub const NUM_SLOWEST_TO_TRACK: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct ExecTimer {
    start_us: u64,
    last_us: u64,
    max_us: u64,
}

impl ExecTimer {
    pub fn started(&mut self, now_us: u64) {
        self.start_us = now_us;
    }

    /// Stop timing and return the elapsed microseconds.
    pub fn ended(&mut self, now_us: u64) -> u64 {
        let elapsed = time_elapsed(now_us, self.start_us);
        self.last_us = elapsed;
        if elapsed > self.max_us {
            self.max_us = elapsed;
        }
        elapsed
    }

    pub fn clear(&mut self) {
        self.last_us = 0;
        self.max_us = 0;
    }

    /// A timer is only meaningful once it has measured something.
    pub fn valid(&self) -> bool {
        self.max_us != 0
    }

    pub fn max_us(&self) -> u64 {
        self.max_us
    }

    pub fn last_us(&self) -> u64 {
        self.last_us
    }
}

#[derive(Debug, Clone)]
struct ModStats {
    name: String,
    timer: ExecTimer,
    slow_count: u32,
}

#[derive(Debug, Clone, Default)]
struct OuterLoop {
    start_us: u64,
    loops: u64,
    total_us: u64,
    max_us: u64,
    min_us: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SupervisorStats {
    mods: Vec<ModStats>,
    outer: OuterLoop,
    avg_us: f64,
    slowest: Vec<usize>,
}

impl SupervisorStats {
    pub fn new() -> SupervisorStats {
        SupervisorStats::default()
    }

    /// Forget all modules. Slot indices handed out by [SupervisorStats::add] become invalid.
    pub fn clear_modules(&mut self) {
        self.mods.clear();
        self.slowest.clear();
    }

    /// Add a module and return its slot index.
    pub fn add(&mut self, name: &str) -> usize {
        self.mods.push(ModStats {
            name: name.to_string(),
            timer: ExecTimer::default(),
            slow_count: 0,
        });
        self.mods.len() - 1
    }

    pub fn outer_loop_started(&mut self, now_us: u64) {
        self.outer.start_us = now_us;
    }

    pub fn outer_loop_ended(&mut self, now_us: u64) {
        let elapsed = time_elapsed(now_us, self.outer.start_us);
        if self.outer.loops == 0 || elapsed < self.outer.min_us {
            self.outer.min_us = elapsed;
        }
        if elapsed > self.outer.max_us {
            self.outer.max_us = elapsed;
        }
        self.outer.loops += 1;
        self.outer.total_us += elapsed;
    }

    pub fn exec_started(&mut self, idx: usize, now_us: u64) {
        if let Some(m) = self.mods.get_mut(idx) {
            m.timer.started(now_us);
        }
    }

    pub fn exec_ended(&mut self, idx: usize, now_us: u64) -> u64 {
        self.mods
            .get_mut(idx)
            .map(|m| m.timer.ended(now_us))
            .unwrap_or(0)
    }

    pub fn record_slow(&mut self, idx: usize) {
        if let Some(m) = self.mods.get_mut(idx) {
            m.slow_count += 1;
        }
    }

    /// Recompute the average loop time and the slowest-module ranking.
    pub fn calculate(&mut self) {
        self.avg_us = if self.outer.loops == 0 {
            0.0
        } else {
            self.outer.total_us as f64 / self.outer.loops as f64
        };
        let mut ranked: Vec<usize> = (0..self.mods.len())
            .filter(|&idx| self.mods[idx].timer.valid())
            .collect();
        // Stable sort keeps list order among equal times.
        ranked.sort_by(|&a, &b| self.mods[b].timer.max_us().cmp(&self.mods[a].timer.max_us()));
        ranked.truncate(NUM_SLOWEST_TO_TRACK);
        self.slowest = ranked;
    }

    /// Start a new measurement window. Slow counts are cumulative and survive.
    pub fn clear(&mut self) {
        self.outer = OuterLoop::default();
        self.avg_us = 0.0;
        self.slowest.clear();
        for m in self.mods.iter_mut() {
            m.timer.clear();
        }
    }

    pub fn loop_count(&self) -> u64 {
        self.outer.loops
    }

    pub fn slow_count(&self, name: &str) -> Option<u32> {
        self.mods.iter().find(|m| m.name == name).map(|m| m.slow_count)
    }

    pub fn max_us(&self, name: &str) -> Option<u64> {
        self.mods.iter().find(|m| m.name == name).map(|m| m.timer.max_us())
    }

    /// Names of the slowest modules from the last [SupervisorStats::calculate], slowest first.
    pub fn slowest(&self) -> Vec<&str> {
        self.slowest.iter().map(|&idx| self.mods[idx].name.as_str()).collect()
    }

    /// `{"avgUs":..,"maxUs":..,"minUs":..,"slowUs":{"<name>":<us>,..}}`, slowest first.
    pub fn summary_json(&self) -> String {
        let mut slow = String::new();
        for (pos, &idx) in self.slowest.iter().enumerate() {
            let m = &self.mods[idx];
            let name = serde_json::Value::String(m.name.clone());
            let _ = write!(
                slow,
                "{}{}:{}",
                if pos == 0 { "" } else { "," },
                name,
                m.timer.max_us()
            );
        }
        format!(
            r#"{{"avgUs":{:.2},"maxUs":{},"minUs":{},"slowUs":{{{}}}}}"#,
            self.avg_us, self.outer.max_us, self.outer.min_us, slow
        )
    }
}
