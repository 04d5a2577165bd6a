//! Device-twin status reporting.
//!
//! The twin is a cloud-held key/value document mirroring device-reported
//! state. The reporter merges partial documents into it, best-effort:
//! most call sites log a failed patch and keep going.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value, json};

use crate::event::JobId;
use crate::hub::{HubClient, HubError};

/// Twin keys beginning with this prefix are protocol-reserved and are
/// never touched by `reset`.
const RESERVED_PREFIX: char = '$';

/// Best-effort mirror of agent state into the device twin.
pub struct StatusReporter<H> {
    hub: Arc<H>,
    connected: Arc<AtomicBool>,
}

impl<H> Clone for StatusReporter<H> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            connected: Arc::clone(&self.connected),
        }
    }
}

impl<H: HubClient> StatusReporter<H> {
    /// Create a reporter sharing the agent's connected flag.
    #[must_use]
    pub fn new(hub: Arc<H>, connected: Arc<AtomicBool>) -> Self {
        Self { hub, connected }
    }

    /// Merge a partial document into the twin's reported properties.
    ///
    /// # Errors
    /// Returns `HubError::NotConnected` without touching the hub when the
    /// connection is not open, or the transport's error otherwise.
    pub async fn patch(&self, partial: Value) -> Result<(), HubError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(HubError::NotConnected);
        }
        self.hub.patch_reported(partial).await
    }

    /// Fire-and-forget variant of [`patch`](Self::patch): failures are
    /// logged, never surfaced to the invoking flow.
    pub async fn patch_quietly(&self, partial: Value) {
        if let Err(e) = self.patch(partial).await {
            tracing::warn!(error = %e, "status patch dropped");
        }
    }

    /// Clear every reported field except protocol-reserved ones.
    ///
    /// # Errors
    /// Returns `HubError::NotConnected` when disconnected, or the
    /// transport's error from reading or patching the twin.
    pub async fn reset(&self) -> Result<(), HubError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(HubError::NotConnected);
        }

        let current = self.hub.reported().await?;
        let Some(fields) = current.as_object() else {
            return Ok(());
        };

        let mut clear = Map::new();
        for key in fields.keys().filter(|k| !k.starts_with(RESERVED_PREFIX)) {
            clear.insert(key.clone(), Value::Null);
        }
        if clear.is_empty() {
            return Ok(());
        }
        self.hub.patch_reported(Value::Object(clear)).await
    }
}

/// Partial document updating one job's slot under `jobs.<id>`.
#[must_use]
pub fn job_patch(job_id: JobId, fields: Value) -> Value {
    json!({ "jobs": { job_id.to_string(): fields } })
}

/// Partial document updating one method's slot under `methods.<name>`.
#[must_use]
pub fn method_patch(name: &str, fields: Value) -> Value {
    json!({ "methods": { name: fields } })
}

/// Partial document setting (or clearing) the currently-active inline
/// method name.
#[must_use]
pub fn running_method_patch(name: Option<&str>) -> Value {
    json!({ "running_method": name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::event::HubEvent;
    use crate::method::MethodCall;

    #[derive(Default)]
    struct StubHub {
        reported: Mutex<Value>,
        patches: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl HubClient for StubHub {
        async fn open(&self) -> Result<(), HubError> {
            Ok(())
        }

        fn send_event(&self, _event: HubEvent) -> Result<(), HubError> {
            Ok(())
        }

        async fn patch_reported(&self, patch: Value) -> Result<(), HubError> {
            self.patches.lock().unwrap().push(patch);
            Ok(())
        }

        async fn reported(&self) -> Result<Value, HubError> {
            Ok(self.reported.lock().unwrap().clone())
        }

        async fn next_method_call(&self) -> Option<MethodCall> {
            None
        }
    }

    fn reporter(connected: bool) -> (Arc<StubHub>, StatusReporter<StubHub>) {
        let hub = Arc::new(StubHub::default());
        let flag = Arc::new(AtomicBool::new(connected));
        (Arc::clone(&hub), StatusReporter::new(hub, flag))
    }

    #[tokio::test]
    async fn test_patch_requires_connection() {
        let (hub, reporter) = reporter(false);
        let err = reporter.patch(json!({"x": 1})).await.unwrap_err();
        assert!(matches!(err, HubError::NotConnected));
        assert!(hub.patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_patch_quietly_swallows_errors() {
        let (hub, reporter) = reporter(false);
        reporter.patch_quietly(json!({"x": 1})).await;
        assert!(hub.patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_spares_reserved_keys() {
        let (hub, reporter) = reporter(true);
        *hub.reported.lock().unwrap() = json!({
            "$metadata": {"v": 3},
            "running_method": "ping",
            "jobs": {"a": {"running": true}},
        });

        reporter.reset().await.unwrap();

        let patches = hub.patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        let cleared = patches[0].as_object().unwrap();
        assert_eq!(cleared.get("running_method"), Some(&Value::Null));
        assert_eq!(cleared.get("jobs"), Some(&Value::Null));
        assert!(!cleared.contains_key("$metadata"));
    }

    #[tokio::test]
    async fn test_reset_on_empty_twin_patches_nothing() {
        let (hub, reporter) = reporter(true);
        *hub.reported.lock().unwrap() = json!({"$metadata": {}});
        reporter.reset().await.unwrap();
        assert!(hub.patches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_job_patch_shape() {
        let id = JobId::new_v4();
        let patch = job_patch(id, json!({"running": false}));
        assert_eq!(patch["jobs"][id.to_string()]["running"], json!(false));
    }
}
