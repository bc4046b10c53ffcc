//! Operator-facing progress reporting.
//!
//! The on-device screen is small and the operator may have to quote these
//! lines back to support, so keep them short and concrete. The menu shell
//! owns the actual rendering; the engine only sees this sink.

use std::sync::Mutex;

pub trait Reporter {
    /// Emit one human-readable line.
    fn print(&self, line: &str);

    /// Called once per supervision poll while a child process runs.
    fn tick(&self);
}

/// Reporter that forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn print(&self, line: &str) {
        log::info!("{line}");
    }

    fn tick(&self) {
        log::debug!(".");
    }
}

/// Collecting reporter for tests.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<String>>,
    ticks: Mutex<usize>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn ticks(&self) -> usize {
        *self.ticks.lock().unwrap()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .any(|line| line.contains(needle))
    }
}

impl Reporter for MemoryReporter {
    fn print(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn tick(&self) {
        *self.ticks.lock().unwrap() += 1;
    }
}
