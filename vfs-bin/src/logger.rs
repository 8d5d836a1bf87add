//! Typical Rust logging for the hosted VFS, formatted to stderr.

use libember::sync::SimpleMutex;
use log::{
    Level,
    LevelFilter,
    Log,
    Metadata,
    Record,
};

/// Logger instance that gets passed to the [`log`] crate.
static LOGGER: GenericLogger = GenericLogger::new();

/// Initializes logging; call this exactly once at startup.
pub fn init() {
    log::set_max_level(LevelFilter::Info);
    log::set_logger(&LOGGER).expect("call this only once!");
}

/// Synchronizes all log output so interleaved server activity stays
/// readable.
struct GenericLogger {
    // advisory lock around the stderr writes
    lock: SimpleMutex<()>,
}

impl GenericLogger {
    const fn new() -> Self {
        Self {
            lock: SimpleMutex::new(()),
        }
    }

    fn level_tag(level: Level) -> &'static str {
        match level {
            Level::Error => "ERROR",
            Level::Warn => " WARN",
            Level::Info => " INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }
}

impl Log for GenericLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let crate_name = record
            .module_path()
            .map(|module| module.split_once("::").map(|x| x.0).unwrap_or(module))
            .unwrap_or("<unknown mod>");
        self.lock.lock().execute_while_locked(|| {
            eprintln!(
                "[{}] {}@{}: {}",
                Self::level_tag(record.level()),
                crate_name,
                record.line().unwrap_or(0),
                record.args(),
            );
        });
    }

    fn flush(&self) {
        // stderr is unbuffered enough
    }
}
