//! Kernel-style stderr backend for the `log` facade.
//!
//! Library code logs with `log::{error, warn, info, debug, trace}`.
//! Binaries call [`init`] once to route those records to stderr.
//!
//! # Environment Variables
//!
//! - `NIO_LOG_LEVEL=<level>` - off/error/warn/info/debug/trace or 0..5 (default info)
//! - `NIO_FLUSH_EPRINT=1` - Flush stderr after each line (useful when chasing crashes)

use log::{Level, LevelFilter, Log, Metadata, Record};

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOGGER: StderrLogger = StderrLogger;

struct StderrLogger;

fn prefix(level: Level) -> &'static str {
    match level {
        Level::Error => "[ERROR]",
        Level::Warn => "[WARN] ",
        Level::Info => "[INFO] ",
        Level::Debug => "[DEBUG]",
        Level::Trace => "[TRACE]",
    }
}

/// Parse a level name or number. Unknown strings map to `Info`.
pub fn parse_level(val: &str) -> LevelFilter {
    match val.trim().to_lowercase().as_str() {
        "off" | "0" => LevelFilter::Off,
        "error" | "1" => LevelFilter::Error,
        "warn" | "2" => LevelFilter::Warn,
        "info" | "3" => LevelFilter::Info,
        "debug" | "4" => LevelFilter::Debug,
        "trace" | "5" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Lock once so concurrent lines never interleave.
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(
            handle,
            "{} {}: {}",
            prefix(record.level()),
            record.target(),
            record.args()
        );
        if FLUSH_ENABLED.load(Ordering::Relaxed) {
            let _ = handle.flush();
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Install the stderr backend and read the environment.
///
/// Safe to call more than once; if another logger is already installed
/// it is left in place and only the level is updated.
pub fn init() {
    if let Ok(val) = std::env::var("NIO_FLUSH_EPRINT") {
        let flush = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }
    let level = std::env::var("NIO_LOG_LEVEL")
        .map(|v| parse_level(&v))
        .unwrap_or(LevelFilter::Info);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Change the level at runtime.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("0"), LevelFilter::Off);
        assert_eq!(parse_level("ERROR"), LevelFilter::Error);
        assert_eq!(parse_level(" debug "), LevelFilter::Debug);
        assert_eq!(parse_level("5"), LevelFilter::Trace);
        assert_eq!(parse_level("loud"), LevelFilter::Info);
    }

    #[test]
    fn test_init_idempotent() {
        init();
        init();
        set_level(LevelFilter::Off);
        log::error!("suppressed");
        assert_eq!(log::max_level(), LevelFilter::Off);
    }

    #[test]
    fn test_prefix_width() {
        for level in [Level::Error, Level::Warn, Level::Info, Level::Debug, Level::Trace] {
            assert_eq!(prefix(level).len(), 7);
        }
    }
}
