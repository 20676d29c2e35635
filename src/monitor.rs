//! Samples queue lengths across the fabric and raises threshold alerts (C9).

use std::collections::HashMap;

use crate::error::WorkerError;
use crate::queue::{all_queue_names, QueueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct QueueThreshold {
    pub limit: u64,
    pub level: AlertLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueAlert {
    pub queue: String,
    pub length: u64,
    pub threshold: u64,
    pub level: AlertLevel,
}

pub struct QueueMonitor {
    queue_names: Vec<String>,
}

impl Default for QueueMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue_names: all_queue_names(),
        }
    }

    /// Current length of every queue in the fabric.
    pub async fn sample_lengths(&self, store: &dyn QueueStore) -> Result<HashMap<String, u64>, WorkerError> {
        let mut lengths = HashMap::with_capacity(self.queue_names.len());
        for name in &self.queue_names {
            lengths.insert(name.clone(), store.length(name).await?);
        }
        Ok(lengths)
    }

    /// Compare sampled lengths against `thresholds`, returning one alert per queue whose
    /// observed length is strictly greater than its configured limit.
    pub async fn check_alerts(
        &self,
        store: &dyn QueueStore,
        thresholds: &HashMap<String, QueueThreshold>,
    ) -> Result<Vec<QueueAlert>, WorkerError> {
        let lengths = self.sample_lengths(store).await?;
        let mut alerts = Vec::new();
        for (queue, threshold) in thresholds {
            let length = lengths.get(queue).copied().unwrap_or(0);
            if length > threshold.limit {
                alerts.push(QueueAlert {
                    queue: queue.clone(),
                    length,
                    threshold: threshold.limit,
                    level: threshold.level,
                });
            }
        }
        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueueStore;

    #[tokio::test]
    async fn sample_lengths_covers_every_queue_in_the_fabric() {
        let store = InMemoryQueueStore::new();
        let monitor = QueueMonitor::new();
        let lengths = monitor.sample_lengths(&store).await.unwrap();
        assert_eq!(lengths.len(), 87);
        assert!(lengths.values().all(|&length| length == 0));
    }

    #[tokio::test]
    async fn check_alerts_fires_only_above_limit() {
        let store = InMemoryQueueStore::new();
        store.append("analysis:ages", "a".to_string()).await.unwrap();
        store.append("analysis:ages", "b".to_string()).await.unwrap();
        store.append("analysis:ages", "c".to_string()).await.unwrap();

        let monitor = QueueMonitor::new();
        let mut thresholds = HashMap::new();
        thresholds.insert(
            "analysis:ages".to_string(),
            QueueThreshold {
                limit: 2,
                level: AlertLevel::Warning,
            },
        );
        thresholds.insert(
            "analysis:themes".to_string(),
            QueueThreshold {
                limit: 0,
                level: AlertLevel::Critical,
            },
        );

        let alerts = monitor.check_alerts(&store, &thresholds).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].queue, "analysis:ages");
        assert_eq!(alerts[0].length, 3);
        assert_eq!(alerts[0].threshold, 2);
    }
}
