//! `log` backend for the debug console.

use crate::qemu_fmt::DebugConsole;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Writes `"[LEVEL] target: message\n"` lines to the debug console.
pub struct QemuLogger {
    max_level: LevelFilter,
}

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Trace);

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }
}

/// Installs the logger. Call once during early init.
///
/// `max_level` becomes the global `log` filter; the static logger itself
/// passes everything the facade lets through.
///
/// # Errors
/// Fails if another logger was installed first.
pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(max_level);
    Ok(())
}

/// Formats one record in the console line format.
///
/// # Errors
/// Propagates errors of the underlying writer.
pub fn write_record<W: Write>(out: &mut W, record: &Record<'_>) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = write_record(&mut DebugConsole, record);
    }

    fn flush(&self) {}
}
