//! Loopback demo for the device-method monitor.
//!
//! Runs the monitor against the in-memory hub: registers a background
//! "repeat" method and an inline "ping" method, invokes both from the
//! cloud side of the loopback, then prints everything the hub saw.
//!
//! Run with: cargo run -p loopback-agent

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iot_monitor_agent::{AgentConfig, IotMonitor};
use iot_monitor_hub::{CONNECTION_STRING_ENV, MemoryHub};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Local runs keep their connection string in .env; the loopback hub
    // ignores credentials, so any well-formed string works as a default.
    let _ = dotenvy::dotenv();
    let connection_string = std::env::var(CONNECTION_STRING_ENV).unwrap_or_else(|_| {
        "HostName=loopback.local;DeviceId=demo-device;SharedAccessKey=ZGVtbw==".into()
    });

    // The directory guard keeps the script alive for the whole run.
    let script_dir = tempfile::tempdir()?;
    let script = write_demo_script(script_dir.path())?;

    let hub = Arc::new(MemoryHub::new());
    let monitor = Arc::new(IotMonitor::new(
        AgentConfig::new()
            .connection_string(connection_string)
            .runtime("sh"),
        Arc::clone(&hub),
    )?);

    monitor.connect().await?;
    monitor.reset_status().await?;
    monitor.register_background_method("repeat", &script).await?;
    monitor
        .register_inline_method(
            "ping",
            Box::new(|log, payload| {
                log.info(&format!("pong {payload}"));
                Ok(())
            }),
        )
        .await?;

    // Cloud side: invoke both methods through the loopback.
    let ping = hub.invoke("ping", json!({ "n": 1 }));
    let repeat = hub.invoke("repeat", Value::Null);
    hub.close_methods();

    let runner = tokio::spawn({
        let monitor = Arc::clone(&monitor);
        async move { monitor.run().await }
    });

    println!("ping   -> {:?}", ping.await?);
    println!("repeat -> {:?}", repeat.await?);
    runner.await?;

    // Let the background job drain before reading the twin.
    while !monitor.running_jobs().is_empty() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for event in hub.sent_events() {
        println!("event: {event}");
    }
    println!(
        "twin: {}",
        serde_json::to_string_pretty(&hub.reported_state())?
    );
    Ok(())
}

fn write_demo_script(dir: &std::path::Path) -> Result<std::path::PathBuf> {
    let path = dir.join("repeater.sh");
    std::fs::write(&path, "echo tick\necho tock\nexit 0\n")?;
    Ok(path)
}
