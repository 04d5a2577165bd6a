//! Hub-side plumbing for the IoT device-method monitor.
//!
//! The real transport SDK is out of scope; this crate carries what the
//! agent needs on its side of that line: device connection-string
//! handling and an in-memory loopback `HubClient` used by tests and the
//! demo binary.

pub mod connection_string;
pub mod memory;

pub use connection_string::{CONNECTION_STRING_ENV, ConnectionString, ConnectionStringError};
pub use memory::{HubOp, MemoryHub};
