//! Agent configuration.
//!
//! Everything the monitor needs arrives through this explicit object;
//! there is no module-level state.

use std::sync::Arc;

use iot_monitor_core::{LogSink, TracingSink};

/// Default runtime command for background job scripts.
pub const DEFAULT_RUNTIME: &str = "node";

/// Configuration for an [`IotMonitor`](crate::IotMonitor).
///
/// The connection string may be left unset, in which case `connect`
/// falls back to the `IOTHUB_DEVICE_CONNECTION_STRING` environment
/// variable.
#[derive(Clone)]
pub struct AgentConfig {
    /// Explicit device connection string, overriding the environment.
    pub connection_string: Option<String>,
    /// Runtime command line used to execute background job scripts.
    pub runtime: String,
    /// Sink receiving local log writes from inline method handlers.
    pub log_sink: Arc<dyn LogSink>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            runtime: DEFAULT_RUNTIME.into(),
            log_sink: Arc::new(TracingSink),
        }
    }
}

impl AgentConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit connection string.
    #[must_use]
    pub fn connection_string(mut self, raw: impl Into<String>) -> Self {
        self.connection_string = Some(raw.into());
        self
    }

    /// Override the runtime command line.
    #[must_use]
    pub fn runtime(mut self, raw: impl Into<String>) -> Self {
        self.runtime = raw.into();
        self
    }

    /// Override the local log sink.
    #[must_use]
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = sink;
        self
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field(
                "connection_string",
                &self.connection_string.as_ref().map(|_| "<redacted>"),
            )
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}
