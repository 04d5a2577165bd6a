//! The seam between the agent and the transport SDK.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::event::HubEvent;
use crate::method::MethodCall;

/// Hub transport error.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("not connected to the hub")]
    NotConnected,
    #[error("hub connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Client side of the hub connection.
///
/// The transport SDK (MQTT framing, method RPC wire format, twin sync)
/// lives behind this trait. The agent only ever talks to the hub through
/// it; tests and demos use the in-memory loopback implementation.
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Open the connection to the hub. A single attempt; no retry.
    async fn open(&self) -> Result<(), HubError>;

    /// Queue a device-to-cloud event for delivery.
    ///
    /// Fire-and-forget: a success here means the event entered the
    /// outbound queue in order. Delivery failures past that point are
    /// the transport's to log.
    ///
    /// # Errors
    /// Returns `HubError::NotConnected` if the connection is not open.
    fn send_event(&self, event: HubEvent) -> Result<(), HubError>;

    /// Merge a partial document into the twin's reported properties
    /// (RFC 7396 semantics: null values remove keys).
    async fn patch_reported(&self, patch: Value) -> Result<(), HubError>;

    /// Snapshot of the twin's current reported properties.
    async fn reported(&self) -> Result<Value, HubError>;

    /// Next device-method invocation, or `None` once the hub is done
    /// delivering methods.
    async fn next_method_call(&self) -> Option<MethodCall>;
}
