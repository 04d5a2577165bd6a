//! Connection management, method registration and dispatch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::RwLock;

use iot_monitor_core::twin::{StatusReporter, method_patch};
use iot_monitor_core::{HubClient, HubError, HubEvent, MethodCall, MethodResponse};
use iot_monitor_hub::{ConnectionString, ConnectionStringError};
use iot_monitor_supervisor::{Job, JobSupervisor, RuntimeCommand, RuntimeError};

use crate::config::AgentConfig;
use crate::inline::{InlineHandler, run_inline};

/// Monitor error.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    ConnectionString(#[from] ConnectionStringError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error("not connected; connect() must succeed before registering methods")]
    NotConnected,
    #[error("method {0:?} is already registered")]
    MethodAlreadyRegistered(String),
}

/// Kind of action a listener is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Background,
    Inline,
}

/// A registered device-method listener. Lives for the process lifetime;
/// listeners are never removed.
#[derive(Debug, Clone)]
pub struct MethodListener {
    pub name: String,
    pub kind: ListenerKind,
    /// Script path for background listeners.
    pub script: Option<PathBuf>,
}

enum MethodAction {
    Background(PathBuf),
    Inline(InlineHandler),
}

/// The device-side monitor.
///
/// Owns the connection state, the method routing table and the job
/// supervisor. Generic over the hub seam so tests and demos can run it
/// against the in-memory loopback hub.
pub struct IotMonitor<H> {
    hub: Arc<H>,
    config: AgentConfig,
    device: OnceLock<ConnectionString>,
    connected: Arc<AtomicBool>,
    supervisor: JobSupervisor<H>,
    reporter: StatusReporter<H>,
    listeners: std::sync::RwLock<Vec<MethodListener>>,
    routes: RwLock<HashMap<String, MethodAction>>,
}

impl<H: HubClient + 'static> IotMonitor<H> {
    /// Create a monitor over the given hub.
    ///
    /// # Errors
    /// Returns an error if the configured runtime command cannot be
    /// parsed.
    pub fn new(config: AgentConfig, hub: Arc<H>) -> Result<Self, MonitorError> {
        let runtime = RuntimeCommand::parse(&config.runtime)?;
        let connected = Arc::new(AtomicBool::new(false));
        let supervisor = JobSupervisor::new(Arc::clone(&hub), Arc::clone(&connected), runtime);
        let reporter = StatusReporter::new(Arc::clone(&hub), Arc::clone(&connected));
        Ok(Self {
            hub,
            config,
            device: OnceLock::new(),
            connected,
            supervisor,
            reporter,
            listeners: std::sync::RwLock::new(Vec::new()),
            routes: RwLock::new(HashMap::new()),
        })
    }

    /// Connect to the hub. A single attempt: no retry here, and no
    /// reconnect if the transport later drops.
    ///
    /// # Errors
    /// Returns the connection-string or transport error. The monitor
    /// stays disconnected on failure.
    pub async fn connect(&self) -> Result<(), MonitorError> {
        let device = ConnectionString::resolve(self.config.connection_string.as_deref())?;
        self.hub.open().await?;
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.device.set(device);

        if let Err(e) = self.hub.send_event(HubEvent::Connected) {
            tracing::warn!(error = %e, "connected notification dropped");
        }
        tracing::info!("Connected!");
        Ok(())
    }

    /// Whether `connect` has succeeded.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Device id from the resolved connection string, once connected.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        self.device.get().map(|d| d.device_id.as_str())
    }

    /// Registered listeners, in registration order.
    ///
    /// # Panics
    /// Panics if a registration panicked while holding the listener lock.
    #[must_use]
    pub fn listeners(&self) -> Vec<MethodListener> {
        self.listeners.read().unwrap().clone()
    }

    /// Live background jobs.
    #[must_use]
    pub fn running_jobs(&self) -> Vec<Job> {
        self.supervisor.running_jobs()
    }

    /// Merge a partial document into the reported status.
    ///
    /// # Errors
    /// Returns `NotConnected` (without any hub traffic) when
    /// disconnected, or the transport's error.
    pub async fn patch_status(&self, partial: Value) -> Result<(), MonitorError> {
        self.reporter.patch(partial).await.map_err(Into::into)
    }

    /// Clear all reported status fields except protocol-reserved ones.
    /// Awaited during initialization, unlike the fire-and-forget patches.
    ///
    /// # Errors
    /// Returns `NotConnected` when disconnected, or the transport's error.
    pub async fn reset_status(&self) -> Result<(), MonitorError> {
        self.reporter.reset().await.map_err(Into::into)
    }

    /// Bind a device method to a background job script.
    ///
    /// # Errors
    /// Returns `NotConnected` before a successful `connect`, or
    /// `MethodAlreadyRegistered` for a duplicate name.
    pub async fn register_background_method(
        &self,
        name: impl Into<String>,
        script: impl Into<PathBuf>,
    ) -> Result<(), MonitorError> {
        let name = name.into();
        let script = script.into();
        let listener = MethodListener {
            name: name.clone(),
            kind: ListenerKind::Background,
            script: Some(script.clone()),
        };
        let meta = json!({
            "kind": "background",
            "script": script.display().to_string(),
        });
        self.register(name, MethodAction::Background(script), listener, meta)
            .await
    }

    /// Bind a device method to an inline handler.
    ///
    /// # Errors
    /// Returns `NotConnected` before a successful `connect`, or
    /// `MethodAlreadyRegistered` for a duplicate name.
    pub async fn register_inline_method(
        &self,
        name: impl Into<String>,
        handler: InlineHandler,
    ) -> Result<(), MonitorError> {
        let name = name.into();
        let listener = MethodListener {
            name: name.clone(),
            kind: ListenerKind::Inline,
            script: None,
        };
        self.register(
            name,
            MethodAction::Inline(handler),
            listener,
            json!({ "kind": "inline" }),
        )
        .await
    }

    async fn register(
        &self,
        name: String,
        action: MethodAction,
        listener: MethodListener,
        meta: Value,
    ) -> Result<(), MonitorError> {
        if !self.is_connected() {
            return Err(MonitorError::NotConnected);
        }

        {
            let mut routes = self.routes.write().await;
            if routes.contains_key(&name) {
                return Err(MonitorError::MethodAlreadyRegistered(name));
            }
            routes.insert(name.clone(), action);
        }
        self.listeners.write().unwrap().push(listener);

        // Registration metadata in the twin is best-effort like any
        // other status patch.
        self.reporter.patch_quietly(method_patch(&name, meta)).await;
        tracing::info!(method = %name, "method registered");
        Ok(())
    }

    /// Dispatch loop. Consumes method invocations until the hub stops
    /// delivering them.
    pub async fn run(&self) {
        while let Some(call) = self.hub.next_method_call().await {
            self.dispatch(call).await;
        }
    }

    async fn dispatch(&self, call: MethodCall) {
        let MethodCall {
            name,
            payload,
            responder,
        } = call;
        tracing::info!(method = %name, "device method invoked");

        let routes = self.routes.read().await;
        let response = match routes.get(&name) {
            None => MethodResponse::failed(format!("no handler registered for {name}")),
            Some(MethodAction::Background(script)) => match self.supervisor.spawn(script).await {
                Ok(job_id) => {
                    MethodResponse::ok(format!("spawned {} as job {job_id}", script.display()))
                }
                Err(e) => {
                    self.reporter
                        .patch_quietly(method_patch(&name, json!({ "last_error": e.to_string() })))
                        .await;
                    MethodResponse::failed(format!("error spawning {}: {e}", script.display()))
                }
            },
            Some(MethodAction::Inline(handler)) => {
                match run_inline(
                    &*self.hub,
                    &self.reporter,
                    self.config.log_sink.as_ref(),
                    self.is_connected(),
                    &name,
                    handler,
                    &payload,
                )
                .await
                {
                    Ok(()) => MethodResponse::ok(format!("ran {name}")),
                    Err(e) => MethodResponse::failed(format!("error running {name}: {e}")),
                }
            }
        };

        // Response-send failures are logged, never retried.
        if let Err(e) = responder.send(response) {
            tracing::warn!(method = %name, error = %e, "method response dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use std::io::Write;
    #[cfg(unix)]
    use std::time::Duration;

    use iot_monitor_core::{LogLevel, MemorySink, method::STATUS_OK};
    use iot_monitor_hub::{HubOp, MemoryHub};

    const TEST_CONN: &str = "HostName=hub.example.net;DeviceId=edge-01;SharedAccessKey=c2VjcmV0";

    fn monitor_with(config: AgentConfig) -> (Arc<MemoryHub>, Arc<IotMonitor<MemoryHub>>) {
        let hub = Arc::new(MemoryHub::new());
        let monitor = Arc::new(IotMonitor::new(config, Arc::clone(&hub)).unwrap());
        (hub, monitor)
    }

    fn test_config() -> AgentConfig {
        AgentConfig::new().connection_string(TEST_CONN)
    }

    /// Run the dispatch loop until the hub's method stream is closed.
    fn spawn_run(monitor: &Arc<IotMonitor<MemoryHub>>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(monitor);
        tokio::spawn(async move { monitor.run().await })
    }

    #[tokio::test]
    async fn test_connect_sends_one_connected_event() {
        let (hub, monitor) = monitor_with(test_config());
        monitor.connect().await.unwrap();

        assert!(monitor.is_connected());
        assert_eq!(monitor.device_id(), Some("edge-01"));
        let connected: Vec<_> = hub
            .sent_events()
            .into_iter()
            .filter(|e| *e == HubEvent::Connected)
            .collect();
        assert_eq!(connected.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_monitor_disconnected() {
        let hub = Arc::new(MemoryHub::failing_to_open("no route"));
        let monitor = IotMonitor::new(test_config(), Arc::clone(&hub)).unwrap();

        let err = monitor.connect().await.unwrap_err();
        assert!(matches!(err, MonitorError::Hub(HubError::Transport(_))));
        assert!(!monitor.is_connected());
    }

    #[tokio::test]
    async fn test_registration_requires_connection() {
        let (_hub, monitor) = monitor_with(test_config());
        let err = monitor
            .register_background_method("repeat", "repeater.js")
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::NotConnected));
        assert!(monitor.listeners().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let (_hub, monitor) = monitor_with(test_config());
        monitor.connect().await.unwrap();
        monitor
            .register_inline_method("ping", Box::new(|_, _| Ok(())))
            .await
            .unwrap();

        let err = monitor
            .register_inline_method("ping", Box::new(|_, _| Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::MethodAlreadyRegistered(name) if name == "ping"));
        assert_eq!(monitor.listeners().len(), 1);
    }

    #[tokio::test]
    async fn test_ping_scenario_order_and_response() {
        let sink = Arc::new(MemorySink::new());
        let (hub, monitor) =
            monitor_with(test_config().log_sink(Arc::clone(&sink) as Arc<dyn iot_monitor_core::LogSink>));
        monitor.connect().await.unwrap();
        monitor
            .register_inline_method(
                "ping",
                Box::new(|log, _payload| {
                    log.info("pong");
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let rx = hub.invoke("ping", Value::Null);
        hub.close_methods();
        spawn_run(&monitor).await.unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status, STATUS_OK);
        assert_eq!(response.message, "ran ping");

        // Patch marking ping active, log relay, patch clearing the flag -
        // in that order.
        let ops = hub.operations();
        let mark = ops
            .iter()
            .position(|op| {
                matches!(op, HubOp::Patch(p) if p["running_method"] == json!("ping"))
            })
            .expect("activation patch");
        let log = ops
            .iter()
            .position(|op| {
                matches!(op, HubOp::Event(HubEvent::MethodLog { message, .. }) if message == "pong")
            })
            .expect("relayed log event");
        let clear = ops
            .iter()
            .position(|op| matches!(op, HubOp::Patch(p) if *p == json!({"running_method": null})))
            .expect("clearing patch");
        assert!(mark < log && log < clear);

        // Pass-through write reached the local sink too.
        assert_eq!(sink.entries(), vec![(LogLevel::Info, "pong".to_owned())]);

        // The merge left no stale active flag behind.
        assert!(hub.reported_state().get("running_method").is_none());
    }

    #[tokio::test]
    async fn test_failing_inline_handler_patches_error_and_responds_500() {
        let (hub, monitor) = monitor_with(test_config());
        monitor.connect().await.unwrap();
        monitor
            .register_inline_method("explode", Box::new(|_, _| Err("kaput".into())))
            .await
            .unwrap();

        let rx = hub.invoke("explode", Value::Null);
        hub.close_methods();
        spawn_run(&monitor).await.unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status, 500);
        assert!(response.message.contains("kaput"));

        assert!(hub.sent_events().iter().any(|e| matches!(
            e,
            HubEvent::MethodError { method, detail } if method == "explode" && detail == "kaput"
        )));
        let state = hub.reported_state();
        assert_eq!(state["methods"]["explode"]["last_error"], json!("kaput"));
        assert!(state.get("running_method").is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_responds_500() {
        let (hub, monitor) = monitor_with(test_config());
        monitor.connect().await.unwrap();

        let rx = hub.invoke("nonsense", Value::Null);
        hub.close_methods();
        spawn_run(&monitor).await.unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status, 500);
        assert!(response.message.contains("no handler"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_background_invocation_spawns_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("job.sh");
        writeln!(std::fs::File::create(&script).unwrap(), "exit 0").unwrap();

        let (hub, monitor) = monitor_with(test_config().runtime("sh"));
        monitor.connect().await.unwrap();
        monitor
            .register_background_method("repeat", &script)
            .await
            .unwrap();

        let rx = hub.invoke("repeat", Value::Null);
        hub.close_methods();
        spawn_run(&monitor).await.unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status, STATUS_OK);
        assert!(response.message.contains("spawned"));

        let starting = hub
            .sent_events()
            .into_iter()
            .filter(|e| matches!(e, HubEvent::JobStarting { .. }))
            .count();
        assert_eq!(starting, 1);

        // Let the child finish so its tasks drain.
        tokio::time::timeout(Duration::from_secs(5), async {
            while !monitor.running_jobs().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_background_spawn_failure_responds_500_and_patches_method() {
        let (hub, monitor) = monitor_with(test_config().runtime("definitely-not-a-runtime-7f3a"));
        monitor.connect().await.unwrap();
        monitor
            .register_background_method("repeat", "repeater.js")
            .await
            .unwrap();

        let rx = hub.invoke("repeat", Value::Null);
        hub.close_methods();
        spawn_run(&monitor).await.unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.status, 500);
        assert!(response.message.contains("error spawning"));
        assert!(
            hub.reported_state()["methods"]["repeat"]["last_error"]
                .as_str()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_patch_status_while_disconnected_fails_quietly() {
        let (hub, monitor) = monitor_with(test_config());
        let err = monitor.patch_status(json!({"x": 1})).await.unwrap_err();
        assert!(matches!(err, MonitorError::Hub(HubError::NotConnected)));
        assert!(hub.operations().is_empty());
    }

    #[tokio::test]
    async fn test_reset_status_clears_previous_fields() {
        let (hub, monitor) = monitor_with(test_config());
        monitor.connect().await.unwrap();
        monitor.patch_status(json!({"stale": true})).await.unwrap();

        monitor.reset_status().await.unwrap();
        let state = hub.reported_state();
        assert!(state.get("stale").is_none());
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_break_dispatch() {
        let (hub, monitor) = monitor_with(test_config());
        monitor.connect().await.unwrap();
        monitor
            .register_inline_method("ping", Box::new(|_, _| Ok(())))
            .await
            .unwrap();

        drop(hub.invoke("ping", Value::Null));
        let rx = hub.invoke("ping", Value::Null);
        hub.close_methods();
        spawn_run(&monitor).await.unwrap();

        // The second call still gets its response.
        assert_eq!(rx.await.unwrap().status, STATUS_OK);
    }
}
