// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Built-in backend for the `log` facade.
//!
//! The library itself only emits through `log::debug!`/`log::warn!` with a
//! `[component]` prefix. Applications that already install a logger need
//! nothing from here; others can enable the `logging` feature and call
//! [`init_logger`] once at startup.
//!
//! ## Example
//!
//! ```ignore
//! use fieldstore::logging::{init_logger, ConsoleOutput};
//! use std::sync::Arc;
//!
//! init_logger(Arc::new(ConsoleOutput::new()), log::LevelFilter::Debug)?;
//! ```

mod output;

pub use output::{ConsoleOutput, FileOutput, Output};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::sync::Arc;

/// `log::Log` implementation forwarding to one [`Output`].
pub struct StoreLogger {
    output: Arc<dyn Output>,
    level: LevelFilter,
}

impl StoreLogger {
    pub fn new(output: Arc<dyn Output>, level: LevelFilter) -> Self {
        Self { output, level }
    }
}

impl Log for StoreLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Sink errors are dropped.
        let _ = self
            .output
            .write(record.level(), record.target(), &record.args().to_string());
    }

    fn flush(&self) {
        let _ = self.output.flush();
    }
}

/// Install a [`StoreLogger`] as the process-wide logger.
///
/// Fails if a logger (of any kind) is already installed.
pub fn init_logger(output: Arc<dyn Output>, level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(StoreLogger::new(output, level)))?;
    log::set_max_level(level);
    Ok(())
}

/// Flush the installed logger, whatever it is.
pub fn flush_logger() {
    log::logger().flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::io;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        lines: Mutex<Vec<String>>,
    }

    impl Output for Capture {
        fn write(&self, level: Level, _target: &str, message: &str) -> io::Result<()> {
            self.lines
                .lock()
                .map_err(|_| io::Error::other("poisoned"))?
                .push(format!("{} {}", level, message));
            Ok(())
        }

        fn flush(&self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_level_filtering() {
        let capture = Arc::new(Capture::default());
        let logger = StoreLogger::new(capture.clone(), LevelFilter::Warn);
        let records = [
            (Level::Debug, "debug"),
            (Level::Warn, "warn"),
            (Level::Error, "error"),
        ];
        for (level, message) in records {
            logger.log(
                &Record::builder()
                    .level(level)
                    .target("fieldstore")
                    .args(format_args!("{}", message))
                    .build(),
            );
        }
        let lines = capture.lines.lock().expect("lock");
        assert_eq!(*lines, vec!["WARN warn".to_string(), "ERROR error".to_string()]);
    }

    #[test]
    fn test_init_logger_once() {
        let first = init_logger(Arc::new(ConsoleOutput::new()), LevelFilter::Info);
        let second = init_logger(Arc::new(ConsoleOutput::new()), LevelFilter::Info);
        // Another test binary logger may already be installed; never two.
        assert!(first.is_err() || second.is_err());
        flush_logger();
    }
}
