//! Debounced directory watcher driving `ConfigRegistry::refresh`.
//!
//! No crate in the ambient stack pulls in an OS file-event subscription, and the teacher's own
//! background-task idiom (`scheduler::daemon`) is itself sleep-and-check, not event-driven — so
//! the watcher here samples an mtime+size fingerprint per `*.yaml` file on a fixed interval and
//! coalesces any burst of changes observed within the debounce window into a single refresh.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::loader::ConfigRegistry;
use crate::observability::Metrics;

type Fingerprint = HashMap<PathBuf, (SystemTime, u64)>;

/// Spawn a background task that polls `dir` and calls `registry.refresh()` whenever the
/// directory's fingerprint settles after changing (debounced by `debounce` and sampled every
/// `poll_interval`).
pub fn spawn_watcher(
    registry: Arc<ConfigRegistry>,
    dir: impl Into<PathBuf>,
    poll_interval: Duration,
    debounce: Duration,
    stop: CancellationToken,
    metrics: Arc<Metrics>,
) -> tokio::task::JoinHandle<()> {
    let dir = dir.into();
    tokio::spawn(async move {
        let mut last_seen = fingerprint(&dir);
        let mut pending_since: Option<std::time::Instant> = None;

        loop {
            tokio::select! {
                () = stop.cancelled() => {
                    info!("config watcher stopping");
                    return;
                }
                () = sleep(poll_interval) => {}
            }

            let current = fingerprint(&dir);
            if current != last_seen {
                pending_since.get_or_insert_with(std::time::Instant::now);
                last_seen = current;
                continue;
            }

            if let Some(since) = pending_since {
                if since.elapsed() >= debounce {
                    pending_since = None;
                    match registry.refresh() {
                        Ok(()) => {
                            metrics.config_reloads_total.inc();
                            info!(dir = %dir.display(), "config hot-reload applied");
                        }
                        Err(err) => {
                            metrics.config_reload_failures_total.inc();
                            error!(dir = %dir.display(), error = %err, "config hot-reload failed");
                        }
                    }
                }
            }
        }
    })
}

fn fingerprint(dir: &Path) -> Fingerprint {
    let mut map = HashMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return map;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        if let Ok(meta) = entry.metadata() {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            map.insert(path, (modified, meta.len()));
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn watcher_refreshes_after_debounce_settles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("captions.yaml");
        let write = |contents: &str| {
            let mut f = std::fs::File::create(&path).expect("create file");
            f.write_all(contents.as_bytes()).expect("write file");
        };
        write(
            r#"
analysis_type: captions
version: "1.0.0"
model_configuration:
  model: vision-model
  temperature: 0.2
  top_p: 0.9
  top_k: 40
  num_ctx: 4096
vision_optimization:
  max_edge_pixels: 1024
  preserve_aspect_ratio: true
parallel_processing:
  max_concurrency: 8
  timeout_seconds: 60
prompts:
  system_prompt: "system"
  user_prompt: "user"
performance_targets:
  success_rate_target: 0.9
qa_stages: [structural]
"#,
        );

        let registry = Arc::new(ConfigRegistry::load(dir.path()).expect("load registry"));
        let stop = CancellationToken::new();
        let handle = spawn_watcher(
            Arc::clone(&registry),
            dir.path(),
            Duration::from_millis(10),
            Duration::from_millis(30),
            stop.clone(),
            crate::observability::metrics::test_metrics(),
        );

        // Touch the file so its fingerprint changes, then give the watcher time to settle.
        tokio::time::sleep(Duration::from_millis(20)).await;
        write(
            r#"
analysis_type: captions
version: "1.0.1"
model_configuration:
  model: vision-model
  temperature: 0.2
  top_p: 0.9
  top_k: 40
  num_ctx: 4096
vision_optimization:
  max_edge_pixels: 1024
  preserve_aspect_ratio: true
parallel_processing:
  max_concurrency: 8
  timeout_seconds: 60
prompts:
  system_prompt: "system"
  user_prompt: "user"
performance_targets:
  success_rate_target: 0.9
qa_stages: [structural]
"#,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        stop.cancel();
        handle.await.expect("watcher task");

        let cfg = registry
            .get(crate::config_registry::schema::AnalysisType::Captions)
            .expect("config present");
        assert_eq!(cfg.version, "1.0.1");
    }
}
