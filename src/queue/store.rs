//! In-memory FIFO queue fabric.
//!
//! Grounded on `original_source/app/queue/queues.py`'s RPUSH/LPOP/BRPOP shape and the teacher's
//! `QueueWorker::run` dequeue loop, which already polls a non-blocking primitive with a sleep
//! backoff rather than blocking the runtime thread. No pack example ships a Redis client, so the
//! backing store here is an in-process `dashmap`-guarded FIFO per queue name instead of a
//! fabricated wire-protocol client.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::sleep;
use tracing::warn;

use crate::error::WorkerError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append `payload` to the tail of `queue`. Returns the new length.
    async fn append(&self, queue: &str, payload: String) -> Result<u64, WorkerError>;

    /// Pop from the head of `queue` without blocking. `None` if empty.
    async fn head_pop(&self, queue: &str) -> Result<Option<String>, WorkerError>;

    /// Pop from the head of `queue`, polling up to `timeout` if currently empty.
    async fn blocking_head_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, WorkerError>;

    /// Current length of `queue`.
    async fn length(&self, queue: &str) -> Result<u64, WorkerError>;

    /// Stop accepting new operations; in-flight polls observe `QueueUnavailable`.
    fn close(&self);
}

/// Reference in-memory implementation: one `VecDeque<String>` per queue name, guarded by
/// `dashmap`'s per-shard locking so unrelated queues never contend with each other.
#[derive(Default)]
pub struct InMemoryQueueStore {
    queues: DashMap<String, VecDeque<String>>,
    closed: AtomicBool,
}

impl InMemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), WorkerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WorkerError::QueueUnavailable(
                "queue store closed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn append(&self, queue: &str, payload: String) -> Result<u64, WorkerError> {
        self.ensure_open()?;
        let mut entry = self.queues.entry(queue.to_string()).or_default();
        entry.push_back(payload);
        Ok(entry.len() as u64)
    }

    async fn head_pop(&self, queue: &str) -> Result<Option<String>, WorkerError> {
        self.ensure_open()?;
        Ok(self
            .queues
            .get_mut(queue)
            .and_then(|mut deque| deque.pop_front()))
    }

    async fn blocking_head_pop(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, WorkerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(item) = self.head_pop(queue).await? {
                return Ok(Some(item));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL.min(timeout)).await;
        }
    }

    async fn length(&self, queue: &str) -> Result<u64, WorkerError> {
        self.ensure_open()?;
        Ok(self.queues.get(queue).map_or(0, |d| d.len() as u64))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Enqueue a serde-serializable item onto `queue`.
pub async fn enqueue<T: serde::Serialize + Sync>(
    store: &dyn QueueStore,
    queue: &str,
    item: &T,
) -> Result<u64, WorkerError> {
    let payload = serde_json::to_string(item)
        .map_err(|e| WorkerError::QueueUnavailable(format!("failed to serialize item: {e}")))?;
    store.append(queue, payload).await
}

/// Pop and deserialize from `queue`, skipping (and logging) malformed entries until a valid one
/// is found or the queue runs dry.
pub async fn dequeue_typed<T: serde::de::DeserializeOwned>(
    store: &dyn QueueStore,
    queue: &str,
) -> Result<Option<T>, WorkerError> {
    loop {
        let Some(raw) = store.head_pop(queue).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<T>(&raw) {
            Ok(item) => return Ok(Some(item)),
            Err(err) => {
                let preview: String = raw.chars().take(120).collect();
                warn!(queue, error = %err, payload_preview = %preview, "dropping malformed queue entry");
            }
        }
    }
}
