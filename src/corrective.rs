//! Decide whether an analysis run needs corrective re-processing, and enqueue it (C6).
//!
//! The trigger shares the same `QueueStore` handle and naming scheme as the queue fabric (C2);
//! no second topology is introduced for corrective work.

use serde::Serialize;

use crate::error::WorkerError;
use crate::qa::OrchestratorResult;
use crate::queue::{enqueue, QueueStore};

#[derive(Debug, Clone)]
pub struct CorrectiveTriggerConfig {
    pub aggregate_threshold: f64,
    pub queue_name: String,
}

#[derive(Debug, Clone, Serialize)]
struct StagePayload {
    stage: String,
    content: String,
    confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
struct CorrectivePayload {
    task_id: String,
    aggregate_confidence: f64,
    context: Option<String>,
    results: Vec<StagePayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectiveDecision {
    pub triggered: bool,
    pub reason: &'static str,
}

/// Evaluate `result` against `config.aggregate_threshold`. If confidence already meets the bar,
/// this is a no-op and the queue is never touched. Otherwise the full orchestrator result is
/// serialized and appended to `config.queue_name`.
pub async fn evaluate(
    store: &dyn QueueStore,
    config: &CorrectiveTriggerConfig,
    task_id: &str,
    result: &OrchestratorResult,
) -> Result<CorrectiveDecision, WorkerError> {
    if result.aggregate_confidence >= config.aggregate_threshold {
        return Ok(CorrectiveDecision {
            triggered: false,
            reason: "threshold_met",
        });
    }

    let payload = CorrectivePayload {
        task_id: task_id.to_string(),
        aggregate_confidence: result.aggregate_confidence,
        context: result
            .context
            .as_ref()
            .map(|ctx| serde_json::to_string(&ctx.accumulator).unwrap_or_default()),
        results: result
            .results
            .iter()
            .map(|outcome| StagePayload {
                stage: outcome.stage.as_str().to_string(),
                content: outcome.response.content.clone(),
                confidence: outcome.response.confidence,
            })
            .collect(),
    };

    enqueue(store, &config.queue_name, &payload).await?;

    Ok(CorrectiveDecision {
        triggered: true,
        reason: "threshold_not_met",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_registry::QAStage;
    use crate::qa::{StageOutcome, ValidationResult};
    use crate::queue::InMemoryQueueStore;

    fn result_with_confidence(confidence: f64) -> OrchestratorResult {
        OrchestratorResult {
            results: vec![StageOutcome {
                stage: QAStage::Structural,
                response: ValidationResult {
                    stage: QAStage::Structural,
                    passed: true,
                    confidence,
                    issues: Vec::new(),
                    corrected_output: None,
                    content: "some content".to_string(),
                },
            }],
            aggregate_confidence: confidence,
            context: None,
        }
    }

    #[tokio::test]
    async fn threshold_met_does_not_touch_queue() {
        let store = InMemoryQueueStore::new();
        let config = CorrectiveTriggerConfig {
            aggregate_threshold: 0.75,
            queue_name: "qa:corrective:test".to_string(),
        };

        let decision = evaluate(&store, &config, "t1", &result_with_confidence(0.9))
            .await
            .unwrap();

        assert_eq!(
            decision,
            CorrectiveDecision {
                triggered: false,
                reason: "threshold_met",
            }
        );
        assert_eq!(store.length("qa:corrective:test").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn below_threshold_enqueues_serialized_payload() {
        let store = InMemoryQueueStore::new();
        let config = CorrectiveTriggerConfig {
            aggregate_threshold: 0.75,
            queue_name: "qa:corrective:test".to_string(),
        };

        let decision = evaluate(&store, &config, "t2", &result_with_confidence(0.4))
            .await
            .unwrap();

        assert_eq!(
            decision,
            CorrectiveDecision {
                triggered: true,
                reason: "threshold_not_met",
            }
        );
        assert_eq!(store.length("qa:corrective:test").await.unwrap(), 1);

        let raw = store.head_pop("qa:corrective:test").await.unwrap().unwrap();
        assert!(raw.contains("\"task_id\":\"t2\""));
    }
}
