//! Inline method execution.
//!
//! An inline method runs synchronously on the dispatch task and blocks
//! it for the full duration of the call - simplicity over
//! responsiveness. The handler logs through a borrowed [`MethodLog`],
//! so the interception window is exactly the synchronous call: nothing
//! the handler schedules for later can hold the logger.

use std::error::Error;

use serde_json::{Value, json};

use iot_monitor_core::twin::{StatusReporter, method_patch, running_method_patch};
use iot_monitor_core::{HubClient, HubEvent, LogLevel, LogSink};

/// Error type produced by inline method handlers.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// An inline method handler. Synchronous by contract.
pub type InlineHandler =
    Box<dyn Fn(&MethodLog<'_>, &Value) -> Result<(), HandlerError> + Send + Sync>;

/// Scoped logger handed to an inline handler.
///
/// Each write is relayed to the hub as a `method_log` event while
/// connected, then passed through to the configured [`LogSink`].
pub struct MethodLog<'a> {
    method: &'a str,
    hub: &'a dyn HubClient,
    connected: bool,
    sink: &'a dyn LogSink,
}

impl MethodLog<'_> {
    /// Name of the method this logger is scoped to.
    #[must_use]
    pub fn method(&self) -> &str {
        self.method
    }

    /// Write one log line, relaying it to the hub when connected.
    pub fn write(&self, level: LogLevel, message: &str) {
        if self.connected {
            if let Err(e) = self
                .hub
                .send_event(HubEvent::method_log(self.method, message))
            {
                tracing::warn!(error = %e, method = self.method, "log relay dropped");
            }
        }
        self.sink.write(level, message);
    }

    /// Info-level write.
    pub fn info(&self, message: &str) {
        self.write(LogLevel::Info, message);
    }

    /// Warn-level write.
    pub fn warn(&self, message: &str) {
        self.write(LogLevel::Warn, message);
    }

    /// Error-level write.
    pub fn error(&self, message: &str) {
        self.write(LogLevel::Error, message);
    }
}

/// Run an inline handler with status patches around it.
///
/// Before the call: the method is marked active and its last error is
/// cleared. On failure: the error is recorded in the twin and relayed as
/// a `method_error` event. In all cases the active flag is cleared
/// afterwards. Every patch is best-effort.
pub(crate) async fn run_inline<H: HubClient>(
    hub: &H,
    reporter: &StatusReporter<H>,
    sink: &dyn LogSink,
    connected: bool,
    name: &str,
    handler: &InlineHandler,
    payload: &Value,
) -> Result<(), HandlerError> {
    reporter
        .patch_quietly(json!({
            "running_method": name,
            "methods": { name: { "last_error": null } },
        }))
        .await;

    let log = MethodLog {
        method: name,
        hub,
        connected,
        sink,
    };
    let result = handler(&log, payload);

    if let Err(e) = &result {
        let detail = e.to_string();
        if connected {
            if let Err(send_err) = hub.send_event(HubEvent::method_error(name, &detail)) {
                tracing::warn!(error = %send_err, method = name, "error notification dropped");
            }
        }
        tracing::error!(method = name, error = %detail, "inline method failed");
        reporter
            .patch_quietly(method_patch(name, json!({ "last_error": detail })))
            .await;
    }

    reporter.patch_quietly(running_method_patch(None)).await;
    result
}
