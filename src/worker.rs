//! Long-lived round-robin dispatcher over the 87-queue fabric (C8).
//!
//! Grounded on the teacher's `queue/worker.rs` semaphore-gated spawn-per-job loop; cancellation
//! uses `tokio_util::sync::CancellationToken`, the same primitive the sibling
//! `rask-log-aggregator`/`rask-log-forwarder` crates use for graceful shutdown, since the
//! teacher itself is request-driven and has no background dispatcher to draw the pattern from.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::observability::Metrics;
use crate::queue::{all_queue_names, QueueStore};

/// User-supplied handler invoked once per dequeued item. Errors are the processor's own
/// responsibility to log; a processor that returns is considered to have handled the item.
#[async_trait]
pub trait QueueProcessor: Send + Sync {
    async fn process(&self, queue_name: &str, raw_payload: String);
}

pub struct WorkerCoordinator {
    store: Arc<dyn QueueStore>,
    processor: Arc<dyn QueueProcessor>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    idle_backoff: Duration,
    queue_names: Vec<String>,
    metrics: Arc<Metrics>,
}

impl WorkerCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        processor: Arc<dyn QueueProcessor>,
        concurrency: usize,
        idle_backoff: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            store,
            processor,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            idle_backoff,
            queue_names: all_queue_names(),
            metrics,
        }
    }

    /// Run the dispatcher loop until `stop` is cancelled. One rotation visits every queue name
    /// exactly once, preserving FIFO order per queue and bounding cross-queue starvation. In-
    /// flight processor invocations are allowed to finish after `stop` fires; this call returns
    /// once the current rotation completes.
    pub async fn run(&self, stop: CancellationToken) {
        loop {
            if stop.is_cancelled() {
                break;
            }

            let mut productive = false;
            for queue_name in &self.queue_names {
                let item = match self.store.head_pop(queue_name).await {
                    Ok(item) => item,
                    Err(error) => {
                        warn!(queue = %queue_name, %error, "failed to poll queue");
                        continue;
                    }
                };

                let Some(payload) = item else {
                    continue;
                };
                productive = true;

                let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                self.metrics
                    .active_workers
                    .set((self.concurrency.saturating_sub(self.semaphore.available_permits())) as f64);
                let processor = Arc::clone(&self.processor);
                let queue_name = queue_name.clone();
                let semaphore = Arc::clone(&self.semaphore);
                let metrics = Arc::clone(&self.metrics);
                let concurrency = self.concurrency;
                tokio::spawn(async move {
                    processor.process(&queue_name, payload).await;
                    drop(permit);
                    metrics
                        .active_workers
                        .set((concurrency.saturating_sub(semaphore.available_permits())) as f64);
                });
            }

            if stop.is_cancelled() {
                break;
            }

            if !productive {
                debug!("rotation produced no work, backing off");
                tokio::select! {
                    () = tokio::time::sleep(self.idle_backoff) => {}
                    () = stop.cancelled() => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use crate::queue::{enqueue, InMemoryQueueStore, QueueItem};

    struct RecordingProcessor {
        seen: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl QueueProcessor for RecordingProcessor {
        async fn process(&self, queue_name: &str, _raw_payload: String) {
            self.seen.lock().unwrap().insert(queue_name.to_string());
        }
    }

    #[tokio::test]
    async fn drains_all_populated_queues_within_a_bounded_wait() {
        let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
        let item = QueueItem {
            task_id: "t1".to_string(),
            payload: Default::default(),
        };
        enqueue(store.as_ref(), "analysis:ages", &item).await.unwrap();
        enqueue(store.as_ref(), "analysis:themes", &item).await.unwrap();
        enqueue(store.as_ref(), "corrective:structural:ages", &item)
            .await
            .unwrap();

        let processor = Arc::new(RecordingProcessor {
            seen: Mutex::new(HashSet::new()),
        });
        let coordinator = WorkerCoordinator::new(
            store,
            Arc::clone(&processor) as Arc<dyn QueueProcessor>,
            8,
            Duration::from_millis(10),
            crate::observability::metrics::test_metrics(),
        );

        let stop = CancellationToken::new();
        let stop_clone = stop.clone();
        let handle = tokio::spawn(async move { coordinator.run(stop_clone).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.cancel();
        handle.await.unwrap();

        let seen = processor.seen.lock().unwrap();
        assert!(seen.contains("analysis:ages"));
        assert!(seen.contains("analysis:themes"));
        assert!(seen.contains("corrective:structural:ages"));
    }

    #[tokio::test]
    async fn stop_signal_halts_the_dispatcher() {
        let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
        let processor = Arc::new(RecordingProcessor {
            seen: Mutex::new(HashSet::new()),
        });
        let coordinator = WorkerCoordinator::new(
            store,
            processor as Arc<dyn QueueProcessor>,
            8,
            Duration::from_millis(5),
            crate::observability::metrics::test_metrics(),
        );

        let stop = CancellationToken::new();
        stop.cancel();

        tokio::time::timeout(Duration::from_millis(200), coordinator.run(stop))
            .await
            .expect("run should return promptly once already cancelled");
    }
}
