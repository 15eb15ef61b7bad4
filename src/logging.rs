//! Injected logging.
//!
//! Components never reach for a global logger directly. They hold a [`Logger`], a cheap
//! cloneable handle over a [`log::Log`] sink plus a target string. The default sink forwards
//! to the process-wide `log` facade, which the binary installs once at startup.

use std::fmt;
use std::sync::Arc;

use log::{Level, Log, Metadata, Record};

/// Cloneable logging capability passed into trainers and optimizers.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: String,
}

impl Logger {
    /// Log through the global `log` facade under `target`.
    pub fn global(target: impl Into<String>) -> Self {
        Self {
            sink: Arc::new(Facade),
            target: target.into(),
        }
    }

    /// Log into a caller-provided sink.
    pub fn new(sink: Arc<dyn Log>, target: impl Into<String>) -> Self {
        Self {
            sink,
            target: target.into(),
        }
    }

    /// Same sink, target extended with `::suffix`.
    pub fn child(&self, suffix: impl fmt::Display) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            target: format!("{}::{suffix}", self.target),
        }
    }

    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn enabled(&self, level: Level) -> bool {
        let metadata = Metadata::builder()
            .level(level)
            .target(&self.target)
            .build();
        self.sink.enabled(&metadata)
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        self.sink.log(
            &Record::builder()
                .args(args)
                .level(level)
                .target(&self.target)
                .build(),
        );
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::global(env!("CARGO_CRATE_NAME"))
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Forwards to whatever logger is installed in the `log` facade.
struct Facade;

impl Log for Facade {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level() && log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record<'_>) {
        log::logger().log(record);
    }

    fn flush(&self) {
        log::logger().flush();
    }
}

macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log(::log::Level::Info, format_args!($($arg)+))
    };
}

macro_rules! log_warn {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log(::log::Level::Warn, format_args!($($arg)+))
    };
}

macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log(::log::Level::Debug, format_args!($($arg)+))
    };
}

pub(crate) use {log_debug, log_info, log_warn};
