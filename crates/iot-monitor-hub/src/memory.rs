//! In-memory loopback hub.
//!
//! Stands in for the transport SDK in tests and demos. Events and twin
//! patches land in a single ordered operation log so tests can assert
//! the exact sequence a flow produced; method invocations are injected
//! locally and answered through the normal responder channel.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use iot_monitor_core::{HubClient, HubError, HubEvent, MethodCall, MethodResponse};

/// One recorded hub-side operation, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubOp {
    /// A device-to-cloud event entered the outbound queue.
    Event(HubEvent),
    /// A reported-properties merge patch was applied.
    Patch(Value),
}

/// Loopback `HubClient` keeping everything in process memory.
pub struct MemoryHub {
    opened: AtomicBool,
    open_error: Option<String>,
    ops: Mutex<Vec<HubOp>>,
    reported: Mutex<Value>,
    calls_tx: Mutex<Option<mpsc::UnboundedSender<MethodCall>>>,
    calls_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MethodCall>>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    /// Create a loopback hub that opens successfully.
    #[must_use]
    pub fn new() -> Self {
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        Self {
            opened: AtomicBool::new(false),
            open_error: None,
            ops: Mutex::new(Vec::new()),
            reported: Mutex::new(Value::Object(serde_json::Map::new())),
            calls_tx: Mutex::new(Some(calls_tx)),
            calls_rx: tokio::sync::Mutex::new(calls_rx),
        }
    }

    /// Create a hub whose `open` fails with the given reason.
    #[must_use]
    pub fn failing_to_open(reason: impl Into<String>) -> Self {
        Self {
            open_error: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Whether `open` has succeeded.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Inject a device-method invocation, as the cloud side would.
    ///
    /// Returns the receiver for the method's response. The receiver may
    /// be dropped to simulate a caller that stopped waiting.
    pub fn invoke(
        &self,
        name: impl Into<String>,
        payload: Value,
    ) -> oneshot::Receiver<MethodResponse> {
        let (call, rx) = MethodCall::new(name, payload);
        if let Some(tx) = self.calls_tx.lock().unwrap().as_ref() {
            let _ = tx.send(call);
        }
        rx
    }

    /// Stop delivering method invocations; the dispatch loop drains what
    /// is queued and then ends.
    pub fn close_methods(&self) {
        self.calls_tx.lock().unwrap().take();
    }

    /// Ordered log of every event and patch issued so far.
    #[must_use]
    pub fn operations(&self) -> Vec<HubOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Just the events, in issue order.
    #[must_use]
    pub fn sent_events(&self) -> Vec<HubEvent> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                HubOp::Event(event) => Some(event),
                HubOp::Patch(_) => None,
            })
            .collect()
    }

    /// Current reported-properties document.
    #[must_use]
    pub fn reported_state(&self) -> Value {
        self.reported.lock().unwrap().clone()
    }

    fn ensure_open(&self) -> Result<(), HubError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(HubError::NotConnected)
        }
    }
}

#[async_trait]
impl HubClient for MemoryHub {
    async fn open(&self) -> Result<(), HubError> {
        if let Some(reason) = &self.open_error {
            return Err(HubError::Transport(reason.clone()));
        }
        self.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_event(&self, event: HubEvent) -> Result<(), HubError> {
        self.ensure_open()?;
        self.ops.lock().unwrap().push(HubOp::Event(event));
        Ok(())
    }

    async fn patch_reported(&self, patch: Value) -> Result<(), HubError> {
        self.ensure_open()?;
        // Merge before logging so a recorded patch is always an applied one.
        json_patch::merge(&mut self.reported.lock().unwrap(), &patch);
        self.ops.lock().unwrap().push(HubOp::Patch(patch));
        Ok(())
    }

    async fn reported(&self) -> Result<Value, HubError> {
        self.ensure_open()?;
        Ok(self.reported_state())
    }

    async fn next_method_call(&self) -> Option<MethodCall> {
        self.calls_rx.lock().await.recv().await
    }
}
