//! Console logger for the `log` facade.
//!
//! [Logger] renders each record as a single ANSI-coloured line and hands it to a [LogSink]
//! supplied by the platform (usually a serial console). [debug_ex!] is a debug-level log that
//! is compiled out of release builds.

use alloc::{boxed::Box, string::String};
use core::fmt::Write;
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, set_logger, set_max_level};

/// Destination for formatted log lines.
pub trait LogSink: Sync {
    fn write_line(&self, line: &str);
}

pub struct Logger {
    sink: &'static dyn LogSink,
    level: LevelFilter,
}

impl Logger {
    pub const fn new(sink: &'static dyn LogSink, level: LevelFilter) -> Logger {
        Logger { sink, level }
    }
}

/// Render one log line with the colour escape for `level`.
pub fn format_line(level: Level, args: core::fmt::Arguments<'_>) -> String {
    let color = match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // BrightYellow
        Level::Info => 20,  // White
        Level::Debug => 32, // Green
        Level::Trace => 90, // BrightBlack
    };
    let mut line = String::new();
    let _ = write!(line, "\u{1B}[{}m[{:}] {}\u{1B}[0m", color, level, args);
    line
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.sink
            .write_line(&format_line(record.level(), *record.args()));
    }

    fn flush(&self) {}
}

/// Install a [Logger] writing to `sink`. Fails if a logger is already installed.
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger: &'static Logger = Box::leak(Box::new(Logger::new(sink, level)));
    set_logger(logger)?;
    set_max_level(level);
    Ok(())
}

/// Improved debug macro,
/// only compiled in debug mode.
#[macro_export]
macro_rules! debug_ex {
    // debug_ex!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            ::log::log!(target: $target, ::log::Level::Debug, $($arg)+)
        }
    };

    // debug_ex!("a {} event", "log")
    ($($arg:tt)+) => {
        #[cfg(debug_assertions)]
        {
            ::log::log!(::log::Level::Debug, $($arg)+)
        }
    }
}
