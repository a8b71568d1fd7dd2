// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log output backends (stderr and file).

use log::Level;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Destination for formatted log lines.
///
/// Implementations must be thread-safe: records on different threads log
/// concurrently.
pub trait Output: Send + Sync {
    fn write(&self, level: Level, target: &str, message: &str) -> io::Result<()>;

    fn flush(&self) -> io::Result<()>;
}

fn format_line(level: Level, target: &str, message: &str) -> String {
    format!("[{:<5}] {}: {}\n", level.as_str(), target, message)
}

/// Writes each line to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleOutput;

impl ConsoleOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Output for ConsoleOutput {
    fn write(&self, level: Level, target: &str, message: &str) -> io::Result<()> {
        io::stderr().write_all(format_line(level, target, message).as_bytes())
    }

    fn flush(&self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Appends each line to a file, truncated on creation.
pub struct FileOutput {
    file: Mutex<File>,
}

impl FileOutput {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl Output for FileOutput {
    fn write(&self, level: Level, target: &str, message: &str) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file output mutex poisoned"))?;
        file.write_all(format_line(level, target, message).as_bytes())
    }

    fn flush(&self) -> io::Result<()> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("file output mutex poisoned"))?
            .flush()
    }
}
