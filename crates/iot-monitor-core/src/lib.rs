//! Core abstractions for the IoT device-method monitor.
//!
//! This crate provides the fundamental building blocks:
//! - `HubEvent` - Typed device-to-cloud event surface
//! - `MethodCall` / `MethodResponse` - Inbound device-method RPC surface
//! - `HubClient` - The seam the transport SDK implements
//! - `LogSink` - Injectable log sink for inline method log interception
//! - `StatusReporter` - Best-effort device-twin status patching

pub mod event;
pub mod hub;
pub mod log;
pub mod method;
pub mod twin;

pub use event::{HubEvent, JobId};
pub use hub::{HubClient, HubError};
pub use log::{LogLevel, LogSink, MemorySink, TracingSink};
pub use method::{MethodCall, MethodResponder, MethodResponse};
pub use twin::StatusReporter;
