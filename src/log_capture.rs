//! User-visible event log.
//!
//! Components that report to the operator (discovery, binding, worker
//! failures) receive an explicit `Arc<dyn LogSink>` instead of reaching for a
//! process-wide logger. [`LogBuffer`] keeps the most recent entries in memory
//! for a status panel and mirrors every entry into `tracing`.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::Level;

/// Destination for operator-facing messages.
pub trait LogSink: Send + Sync {
    /// Records one message from `source`.
    fn record(&self, level: Level, source: &str, message: String);

    /// Records an informational message.
    fn log(&self, source: &str, message: String) {
        self.record(Level::INFO, source, message);
    }

    /// Records a warning.
    fn warn(&self, source: &str, message: String) {
        self.record(Level::WARN, source, message);
    }
}

/// One captured message.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Local time the entry was recorded
    pub timestamp: DateTime<Local>,
    /// Severity
    pub level: Level,
    /// Reporting component (e.g. "discovery", "worker:LAC")
    pub target: String,
    /// Message text
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]: {}",
            self.timestamp.format("%d-%m-%Y %H:%M:%S"),
            self.message
        )
    }
}

/// Bounded, shareable in-memory log.
#[derive(Clone)]
pub struct LogBuffer {
    entries: Arc<RwLock<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl LogBuffer {
    /// Creates a buffer keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    /// Copies the current entries, oldest first.
    pub fn read(&self) -> Vec<LogEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` when the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Whether any entry at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.entries
            .read()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }
}

impl LogSink for LogBuffer {
    fn record(&self, level: Level, source: &str, message: String) {
        match level {
            Level::ERROR => tracing::error!(source, "{}", message),
            Level::WARN => tracing::warn!(source, "{}", message),
            Level::INFO => tracing::info!(source, "{}", message),
            _ => tracing::debug!(source, "{}", message),
        }

        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            target: source.to_string(),
            message,
        });
    }
}
