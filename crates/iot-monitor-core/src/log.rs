//! Injectable log sink.
//!
//! Inline method handlers write through a scoped logger instead of a
//! process-global log function; the sink behind it is injected at
//! construction so tests can observe exactly what was written.

use std::sync::Mutex;

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Destination for local log writes.
pub trait LogSink: Send + Sync {
    /// Write one log line at the given level.
    fn write(&self, level: LogLevel, message: &str);
}

/// Default sink: forwards to `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!(target: "iot_monitor", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "iot_monitor", "{message}"),
            LogLevel::Error => tracing::error!(target: "iot_monitor", "{message}"),
        }
    }
}

/// Capture sink recording every write, for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemorySink {
    /// Create an empty capture sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    ///
    /// # Panics
    /// Panics if a writer panicked while holding the internal lock.
    #[must_use]
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries.lock().unwrap().clone()
    }
}

impl LogSink for MemorySink {
    fn write(&self, level: LogLevel, message: &str) {
        self.entries.lock().unwrap().push((level, message.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.write(LogLevel::Info, "first");
        sink.write(LogLevel::Error, "second");

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (LogLevel::Info, "first".to_owned()));
        assert_eq!(entries[1], (LogLevel::Error, "second".to_owned()));
    }
}
