use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vision_qa_worker::app::ComponentRegistry;
use vision_qa_worker::config::Config;

const QUEUE_MONITOR_INTERVAL: Duration = Duration::from_secs(15);
const JOB_LIFECYCLE_IDLE_BACKOFF: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(thread = thread_name, message, "panic occurred without location information");
        }
    }));

    // Tracing initialization is handled by Telemetry::new() inside ComponentRegistry::build.
    let config = Config::from_env().context("failed to load configuration")?;
    let registry = Arc::new(
        ComponentRegistry::build(config)
            .await
            .context("failed to build component registry")?,
    );

    let stop = CancellationToken::new();

    let config_watcher = registry.spawn_config_watcher(stop.clone());
    let worker_coordinator = registry.spawn_worker_coordinator(stop.clone());
    let job_lifecycle = registry.spawn_job_lifecycle_loop(JOB_LIFECYCLE_IDLE_BACKOFF, stop.clone());
    let queue_monitor = spawn_queue_monitor_loop(Arc::clone(&registry), stop.clone());

    info!("vision-qa-worker started");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                error!(%error, "failed to install ctrl-c handler");
            }
            info!("shutdown signal received");
        }
        () = stop.cancelled() => {}
    }

    stop.cancel();

    for (name, handle) in [
        ("config_watcher", config_watcher),
        ("worker_coordinator", worker_coordinator),
        ("job_lifecycle", job_lifecycle),
        ("queue_monitor", queue_monitor),
    ] {
        if let Err(error) = handle.await {
            error!(task = name, %error, "background task panicked");
        }
    }

    info!("vision-qa-worker stopped");
    Ok(())
}

/// Periodically sample queue lengths into the metrics registry (C9 + C13). Not part of
/// `ComponentRegistry` itself since it is purely an observability cadence, not a component.
fn spawn_queue_monitor_loop(registry: Arc<ComponentRegistry>, stop: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = tokio::time::sleep(QUEUE_MONITOR_INTERVAL) => {}
                () = stop.cancelled() => break,
            }
            if let Err(error) = registry.sample_queue_lengths().await {
                error!(%error, "queue length sampling failed");
            }
        }
    })
}
