//! The device-side monitor.
//!
//! Connects to the hub, listens for device methods, and routes each
//! invocation to a background job spawn or an inline handler, relaying
//! output and errors back as hub events and mirroring status into the
//! device twin.

pub mod config;
pub mod inline;
pub mod monitor;

pub use config::AgentConfig;
pub use inline::{HandlerError, InlineHandler, MethodLog};
pub use monitor::{IotMonitor, ListenerKind, MethodListener, MonitorError};
