// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Stderr logger
//!
//! Implements the `log::Log` trait to route the library's log records to
//! standard error as `[LEVEL] message`. Installing it is optional: programs
//! that already use a `log` backend get the same records through theirs.

use std::io::Write;

use log::{LevelFilter, Metadata, Record, SetLoggerError};

/// Global logger instance
static LOGGER: StderrLogger = StderrLogger;

/// Simple logger writing to stderr
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Initialize the logger.
///
/// # Arguments
/// * `max_level` - The maximum log level to display.
///
/// Fails if another logger is already installed.
pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(max_level);
    log::debug!("[LOG] logger initialized with level: {}", max_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;

    #[test]
    fn test_logger_init_once() {
        let first = init(LevelFilter::Warn);
        // A second logger can never be installed
        assert!(init(LevelFilter::Trace).is_err());
        if first.is_ok() {
            assert!(LOGGER.enabled(&Metadata::builder().level(log::Level::Error).build()));
            assert!(!LOGGER.enabled(&Metadata::builder().level(log::Level::Debug).build()));
        }
    }
}
