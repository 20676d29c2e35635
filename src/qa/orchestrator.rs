//! Registry of `stage -> agent` plus the two execution modes (C5).
//!
//! Grounded on the teacher's `pipeline/dispatch.rs` `Arc<Semaphore>`-gated stage execution: each
//! agent invocation acquires a permit from one shared semaphore before running, whether stages
//! run concurrently or sequentially.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::config_registry::QAStage;
use crate::error::WorkerError;

use super::agent::{Agent, ValidationContext, ValidationResult};

const DEFAULT_SEMAPHORE_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: QAStage,
    pub response: ValidationResult,
}

#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    pub results: Vec<StageOutcome>,
    pub aggregate_confidence: f64,
    pub context: Option<ValidationContext>,
}

pub struct QaOrchestrator {
    agents: HashMap<QAStage, Arc<dyn Agent>>,
    semaphore: Arc<Semaphore>,
}

impl QaOrchestrator {
    #[must_use]
    pub fn new(semaphore_capacity: usize) -> Self {
        let capacity = if semaphore_capacity == 0 {
            DEFAULT_SEMAPHORE_CAPACITY
        } else {
            semaphore_capacity
        };
        Self {
            agents: HashMap::new(),
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        self.agents.insert(agent.stage(), agent);
    }

    /// The agent registered for `stage`, if any. Lets callers re-run a single stage (corrective
    /// re-validation) without going through `run_all`/`run_sequential`.
    #[must_use]
    pub fn agent(&self, stage: QAStage) -> Option<Arc<dyn Agent>> {
        self.agents.get(&stage).cloned()
    }

    async fn run_one(&self, agent: &Arc<dyn Agent>, context: &ValidationContext) -> Result<ValidationResult, WorkerError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::Cancelled)?;
        agent.validate(context).await
    }

    /// Run every registered stage concurrently. Results are returned stage-tagged; aggregate
    /// confidence is the arithmetic mean over the stages that ran (`0.0` if none are registered).
    pub async fn run_all(&self, context: ValidationContext) -> Result<OrchestratorResult, WorkerError> {
        if self.agents.is_empty() {
            return Ok(OrchestratorResult {
                results: Vec::new(),
                aggregate_confidence: 0.0,
                context: None,
            });
        }

        let futures = self.agents.values().map(|agent| {
            let context = context.clone();
            async move {
                let response = self.run_one(agent, &context).await?;
                Ok::<StageOutcome, WorkerError>(StageOutcome {
                    stage: response.stage,
                    response,
                })
            }
        });

        let results: Vec<StageOutcome> = join_all(futures)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let aggregate_confidence = mean_confidence(&results);
        Ok(OrchestratorResult {
            results,
            aggregate_confidence,
            context: Some(context),
        })
    }

    /// Run registered stages in canonical order (structural, content_quality, domain_expert),
    /// skipping any stage with no registered agent. Each stage's output is written into the
    /// context accumulator as `<stage>_content` before the next stage runs.
    pub async fn run_sequential(&self, mut context: ValidationContext) -> Result<OrchestratorResult, WorkerError> {
        let mut results = Vec::new();

        for stage in QAStage::CANONICAL_ORDER {
            let Some(agent) = self.agents.get(&stage) else {
                continue;
            };
            let response = self.run_one(agent, &context).await?;
            context
                .accumulator
                .insert(format!("{}_content", stage.as_str()), response.content.clone());
            results.push(StageOutcome { stage, response });
        }

        if results.is_empty() {
            return Ok(OrchestratorResult {
                results,
                aggregate_confidence: 0.0,
                context: None,
            });
        }

        let aggregate_confidence = mean_confidence(&results);
        Ok(OrchestratorResult {
            results,
            aggregate_confidence,
            context: Some(context),
        })
    }
}

fn mean_confidence(results: &[StageOutcome]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let sum: f64 = results.iter().map(|r| r.response.confidence).sum();
    sum / results.len() as f64
}
