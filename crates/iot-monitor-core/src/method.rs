//! Device-method RPC surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

/// Response code for a successfully handled method.
pub const STATUS_OK: u16 = 200;
/// Response code for a failed method.
pub const STATUS_FAILED: u16 = 500;

/// Response returned to the remote caller of a device method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodResponse {
    pub status: u16,
    pub message: String,
}

impl MethodResponse {
    /// A 200 response with a descriptive message.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK,
            message: message.into(),
        }
    }

    /// A 500 response with a descriptive message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_FAILED,
            message: message.into(),
        }
    }

    /// Whether this is a success response.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Error returned when the remote caller stopped waiting for a response.
#[derive(Debug, Error)]
#[error("method caller went away before the response was sent")]
pub struct ResponderClosed;

/// One-shot channel for answering a single method invocation.
#[derive(Debug)]
pub struct MethodResponder(oneshot::Sender<MethodResponse>);

impl MethodResponder {
    /// Send the response to the remote caller.
    ///
    /// # Errors
    /// Returns `ResponderClosed` if the caller is no longer waiting.
    /// Callers log this and move on; responses are never retried.
    pub fn send(self, response: MethodResponse) -> Result<(), ResponderClosed> {
        self.0.send(response).map_err(|_| ResponderClosed)
    }
}

/// A device-method invocation delivered by the transport.
#[derive(Debug)]
pub struct MethodCall {
    /// Remote method name.
    pub name: String,
    /// Opaque request payload.
    pub payload: Value,
    /// Channel for the (status, message) response.
    pub responder: MethodResponder,
}

impl MethodCall {
    /// Create an invocation plus the receiver for its response.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        payload: Value,
    ) -> (Self, oneshot::Receiver<MethodResponse>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                name: name.into(),
                payload,
                responder: MethodResponder(tx),
            },
            rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_codes() {
        assert!(MethodResponse::ok("done").is_ok());
        assert!(!MethodResponse::failed("broken").is_ok());
        assert_eq!(MethodResponse::failed("broken").status, STATUS_FAILED);
    }

    #[tokio::test]
    async fn test_respond_roundtrip() {
        let (call, rx) = MethodCall::new("ping", json!({"n": 1}));
        assert_eq!(call.name, "ping");
        call.responder.send(MethodResponse::ok("pong")).unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(response.message, "pong");
    }

    #[tokio::test]
    async fn test_respond_to_dropped_caller() {
        let (call, rx) = MethodCall::new("ping", Value::Null);
        drop(rx);
        assert!(call.responder.send(MethodResponse::ok("pong")).is_err());
    }
}
