//! Wires the queue fabric (C2) and the job driver (C11) to the rest of the pipeline.
//!
//! Two processors live here because the data flow in §2 has two independent entry points into
//! the same C3 (prepare_run) -> C4 (model call) -> C5 (QA) -> C6 (corrective trigger) chain: the
//! worker coordinator (C8) pulls work off the 87-queue fabric, and the job lifecycle driver (C11)
//! pulls work from the external job-driver RPC. `Engine` (C7) only covers the second path's model
//! invocation and QA summary; it never enqueues corrective work itself, so both processors below
//! own that last step directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config_registry::{AnalysisType, ConfigRegistry, QAStage};
use crate::corrective::{self, CorrectiveTriggerConfig};
use crate::engine::Engine;
use crate::error::WorkerError;
use crate::job_driver::{Job, JobProcessor, ProcessOutcome};
use crate::model_caller::{call_with_timeout, ChatMessage, ModelProvider, ModelRequest};
use crate::observability::Metrics;
use crate::prompt::{prepare_run, PLACEHOLDER_IMAGE_BASE64};
use crate::qa::{OrchestratorResult, QaOrchestrator, StageOutcome, ValidationContext, ValidationResult};
use crate::queue::{corrective_queue_name, CorrectiveQueueItem, ManagementQueueItem, QueueItem, QueueStore};
use crate::state::{audit_event::CORRECTIVE_TRIGGERED, ProcessState, StateService, TaskStatus};
use crate::worker::QueueProcessor;

const ANALYSIS_PREFIX: &str = "analysis:";
const CORRECTIVE_PREFIX: &str = "corrective:";
const MANAGEMENT_PREFIX: &str = "mgmt:";

const NON_EMPTY_CONFIDENCE: f64 = 0.5;
const EMPTY_CONFIDENCE: f64 = 0.0;

/// Routes items dequeued by the worker coordinator (C8) to the handler matching their queue's
/// role in the fixed topology (§2's analysis/corrective/management split).
pub struct AnalysisDispatchProcessor {
    registry: Arc<ConfigRegistry>,
    provider: Arc<dyn ModelProvider>,
    qa: Arc<QaOrchestrator>,
    store: Arc<dyn QueueStore>,
    state: Arc<StateService>,
    model_timeout: Duration,
    corrective: CorrectiveTriggerParams,
    metrics: Arc<Metrics>,
}

#[derive(Clone, Copy)]
struct CorrectiveTriggerParams {
    aggregate_threshold: f64,
}

impl AnalysisDispatchProcessor {
    #[must_use]
    pub fn new(
        registry: Arc<ConfigRegistry>,
        provider: Arc<dyn ModelProvider>,
        qa: Arc<QaOrchestrator>,
        store: Arc<dyn QueueStore>,
        state: Arc<StateService>,
        model_timeout: Duration,
        corrective_aggregate_threshold: f64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            provider,
            qa,
            store,
            state,
            model_timeout,
            corrective: CorrectiveTriggerParams {
                aggregate_threshold: corrective_aggregate_threshold,
            },
            metrics,
        }
    }

    async fn handle_analysis(&self, queue_name: &str, raw_payload: &str) {
        let Some(type_name) = queue_name.strip_prefix(ANALYSIS_PREFIX) else {
            warn!(queue = %queue_name, "analysis handler invoked on a non-analysis queue");
            return;
        };
        let Some(analysis_type) = AnalysisType::from_str(type_name) else {
            warn!(queue = %queue_name, "unknown analysis_type in queue name, dropping item");
            return;
        };

        let item: QueueItem = match serde_json::from_str(raw_payload) {
            Ok(item) => item,
            Err(error) => {
                warn!(queue = %queue_name, %error, "dropping malformed analysis queue item");
                return;
            }
        };

        if let Err(error) = self.run_analysis(analysis_type, &item).await {
            warn!(queue = %queue_name, task_id = %item.task_id, %error, "analysis dispatch failed");
        }
    }

    async fn run_analysis(&self, analysis_type: AnalysisType, item: &QueueItem) -> Result<(), WorkerError> {
        let started = std::time::Instant::now();
        let image_b64 = item
            .payload
            .get("image_b64")
            .and_then(Value::as_str)
            .unwrap_or(PLACEHOLDER_IMAGE_BASE64);

        let task_id = self.state.create_task(analysis_type, TaskStatus::Running).await?;
        let process_id = self.state.create_process(&task_id, "queue-dispatch", ProcessState::Started).await?;

        let prepared = prepare_run(&self.registry, analysis_type, image_b64, None)?;
        let temperature = Engine::effective_temperature(analysis_type, prepared.model_params.temperature);

        let request = ModelRequest {
            model: prepared.model_params.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prepared.system_prompt,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prepared.user_prompt,
                },
            ],
            temperature,
            top_p: prepared.model_params.top_p,
            top_k: prepared.model_params.top_k,
            num_ctx: prepared.model_params.num_ctx,
            num_predict: prepared.model_params.num_predict,
        };

        let outcome = call_with_timeout(self.provider.as_ref(), request, self.model_timeout).await;
        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                self.state.update_task_status(&task_id, TaskStatus::Failed).await?;
                self.state.update_process(&process_id, ProcessState::Failed).await?;
                self.metrics
                    .analysis_runs_total
                    .with_label_values(&[analysis_type.as_str(), "failure"])
                    .inc();
                self.metrics
                    .analysis_duration
                    .with_label_values(&[analysis_type.as_str()])
                    .observe(started.elapsed().as_secs_f64());
                return Err(error);
            }
        };

        let content = response.first_content().to_string();
        let confidence = if content.is_empty() { EMPTY_CONFIDENCE } else { NON_EMPTY_CONFIDENCE };

        let context = ValidationContext::new(analysis_type, prepared.config_version, content.clone());
        let qa_result = self.qa.run_sequential(context).await?;

        for outcome in &qa_result.results {
            self.log_qa_attempt(&task_id, outcome).await;
            self.metrics
                .qa_stage_confidence
                .with_label_values(&[outcome.stage.as_str()])
                .observe(outcome.response.confidence);
        }

        if !qa_result.results.is_empty() {
            self.metrics.qa_aggregate_confidence.observe(qa_result.aggregate_confidence);
            self.maybe_trigger_corrective(&task_id, &process_id, analysis_type, &qa_result).await?;
        }

        info!(
            task_id = %task_id,
            analysis_type = analysis_type.as_str(),
            confidence,
            aggregate_confidence = qa_result.aggregate_confidence,
            "analysis completed"
        );

        self.state.update_task_status(&task_id, TaskStatus::Completed).await?;
        self.state.update_process(&process_id, ProcessState::Completed).await?;
        self.metrics
            .analysis_runs_total
            .with_label_values(&[analysis_type.as_str(), "success"])
            .inc();
        self.metrics
            .analysis_duration
            .with_label_values(&[analysis_type.as_str()])
            .observe(started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn log_qa_attempt(&self, task_id: &str, outcome: &StageOutcome) {
        let failure_reasons = if outcome.response.issues.is_empty() {
            None
        } else {
            Some(outcome.response.issues.clone())
        };
        let validation_result = serde_json::json!({
            "passed": outcome.response.passed,
            "confidence": outcome.response.confidence,
        });
        if let Err(error) = self
            .state
            .log_qa_attempt(task_id, outcome.stage, validation_result, failure_reasons, None)
            .await
        {
            warn!(task_id, stage = outcome.stage.as_str(), %error, "failed to log QA attempt");
        }
    }

    /// Below the aggregate threshold, route the full orchestrator result to the corrective queue
    /// of the worst-performing stage that ran (ties broken by canonical stage order). The fabric
    /// has one corrective queue per (stage, analysis_type) pair, so a single aggregate confidence
    /// figure has to resolve to exactly one of them; routing by the weakest stage sends the work
    /// to the re-validation queue most likely to need it.
    async fn maybe_trigger_corrective(
        &self,
        task_id: &str,
        process_id: &str,
        analysis_type: AnalysisType,
        qa_result: &OrchestratorResult,
    ) -> Result<(), WorkerError> {
        let Some(worst) = worst_stage(qa_result) else {
            return Ok(());
        };
        let config = CorrectiveTriggerConfig {
            aggregate_threshold: self.corrective.aggregate_threshold,
            queue_name: corrective_queue_name(worst, analysis_type),
        };

        let decision = corrective::evaluate(self.store.as_ref(), &config, task_id, qa_result).await?;
        if decision.triggered {
            self.metrics
                .corrective_triggers_total
                .with_label_values(&[analysis_type.as_str()])
                .inc();
            self.state
                .append_audit(
                    process_id,
                    CORRECTIVE_TRIGGERED,
                    Some(serde_json::json!({"stage": worst.as_str(), "queue": config.queue_name})),
                )
                .await?;
        }
        Ok(())
    }

    async fn handle_corrective(&self, queue_name: &str, raw_payload: &str) {
        let item: CorrectiveQueueItem = match serde_json::from_str(raw_payload) {
            Ok(item) => item,
            Err(error) => {
                warn!(queue = %queue_name, %error, "dropping malformed corrective queue item");
                return;
            }
        };

        let Some(agent) = self.qa.agent(item.stage) else {
            warn!(queue = %queue_name, stage = item.stage.as_str(), "no agent registered for corrective stage, dropping item");
            return;
        };

        let mut context = ValidationContext::new(item.analysis_type, "corrective".to_string(), item.original_output.clone());
        context.image = item.image_b64.clone();

        let result: Result<ValidationResult, WorkerError> = agent.validate(&context).await;
        match result {
            Ok(validation) => {
                let outcome = StageOutcome {
                    stage: item.stage,
                    response: validation,
                };
                self.log_qa_attempt(&item.task_id, &outcome).await;
                info!(task_id = %item.task_id, stage = item.stage.as_str(), "corrective re-validation completed");
            }
            Err(error) => {
                warn!(task_id = %item.task_id, stage = item.stage.as_str(), %error, "corrective re-validation failed");
            }
        }
    }

    async fn handle_management(queue_name: &str, raw_payload: &str) {
        match serde_json::from_str::<ManagementQueueItem>(raw_payload) {
            Ok(item) => info!(
                queue = %queue_name,
                task_id = %item.task_id,
                reason = %item.reason,
                priority = ?item.priority,
                batch_id = ?item.batch_id,
                "management queue item observed"
            ),
            Err(error) => warn!(queue = %queue_name, %error, "dropping malformed management queue item"),
        }
    }
}

fn worst_stage(result: &OrchestratorResult) -> Option<QAStage> {
    result
        .results
        .iter()
        .min_by(|a, b| {
            a.response
                .confidence
                .partial_cmp(&b.response.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|outcome| outcome.stage)
}

#[async_trait]
impl QueueProcessor for AnalysisDispatchProcessor {
    async fn process(&self, queue_name: &str, raw_payload: String) {
        if queue_name.starts_with(ANALYSIS_PREFIX) {
            self.handle_analysis(queue_name, &raw_payload).await;
        } else if queue_name.starts_with(CORRECTIVE_PREFIX) {
            self.handle_corrective(queue_name, &raw_payload).await;
        } else if queue_name.starts_with(MANAGEMENT_PREFIX) {
            Self::handle_management(queue_name, &raw_payload).await;
        } else {
            warn!(queue = %queue_name, "dequeued item from an unrecognized queue, dropping");
        }
    }
}

/// Drives the engine (C7) from the job-lifecycle loop (C11), then independently evaluates the
/// corrective trigger (C6) since `Engine::run_single` stops at a `QaSummary`.
pub struct EngineJobProcessor {
    engine: Arc<Engine>,
    store: Arc<dyn QueueStore>,
    state: Arc<StateService>,
    corrective_aggregate_threshold: f64,
    metrics: Arc<Metrics>,
}

impl EngineJobProcessor {
    #[must_use]
    pub fn new(
        engine: Arc<Engine>,
        store: Arc<dyn QueueStore>,
        state: Arc<StateService>,
        corrective_aggregate_threshold: f64,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            engine,
            store,
            state,
            corrective_aggregate_threshold,
            metrics,
        }
    }
}

#[async_trait]
impl JobProcessor for EngineJobProcessor {
    async fn process(&self, job: &Job) -> Result<ProcessOutcome, WorkerError> {
        let payload: HashMap<String, Value> = match &job.payload {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => HashMap::new(),
        };

        let type_name = payload
            .get("analysis_type")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkerError::ClientError("job payload missing analysis_type".to_string()))?;
        let analysis_type = AnalysisType::from_str(type_name)
            .ok_or_else(|| WorkerError::ClientError(format!("unknown analysis_type {type_name}")))?;
        let image_b64 = payload
            .get("image_b64")
            .and_then(Value::as_str)
            .unwrap_or(PLACEHOLDER_IMAGE_BASE64)
            .to_string();

        let task_id = self.state.create_task(analysis_type, TaskStatus::Running).await?;
        let process_id = self
            .state
            .create_process(&task_id, &job.job_id, ProcessState::Started)
            .await?;

        let result = self
            .engine
            .run_single(crate::engine::AnalysisJob {
                analysis_type,
                base64_image: image_b64,
            })
            .await;

        self.metrics
            .analysis_duration
            .with_label_values(&[analysis_type.as_str()])
            .observe(result.duration_ms as f64 / 1000.0);

        if !result.success {
            self.state.update_task_status(&task_id, TaskStatus::Failed).await?;
            self.state.update_process(&process_id, ProcessState::Failed).await?;
            self.metrics
                .analysis_runs_total
                .with_label_values(&[analysis_type.as_str(), "failure"])
                .inc();
            return Err(WorkerError::ProviderPermanent(
                result.error.unwrap_or_else(|| "analysis failed with no error detail".to_string()),
            ));
        }
        self.metrics
            .analysis_runs_total
            .with_label_values(&[analysis_type.as_str(), "success"])
            .inc();

        if let Some(qa) = &result.qa {
            for stage in &qa.stages {
                self.metrics
                    .qa_stage_confidence
                    .with_label_values(&[stage.stage.as_str()])
                    .observe(stage.confidence);
            }
            self.metrics.qa_aggregate_confidence.observe(qa.aggregate_confidence);
            self.evaluate_corrective(&task_id, &process_id, analysis_type, result.content.as_deref().unwrap_or(""), qa)
                .await;
        }

        self.state.update_task_status(&task_id, TaskStatus::Completed).await?;
        self.state.update_process(&process_id, ProcessState::Completed).await?;

        Ok(ProcessOutcome {
            result: serde_json::json!({
                "content": result.content,
                "confidence": result.confidence,
                "qa": result.qa.as_ref().map(|qa| serde_json::json!({
                    "aggregate_confidence": qa.aggregate_confidence,
                    "stages": qa.stages.iter().map(|s| serde_json::json!({
                        "stage": s.stage.as_str(),
                        "confidence": s.confidence,
                    })).collect::<Vec<_>>(),
                })),
            }),
            meta: Some(serde_json::json!({"gpu_id": result.gpu_id, "duration_ms": result.duration_ms})),
        })
    }
}

impl EngineJobProcessor {
    /// `Engine::run_single` only returns a [`crate::engine::QaSummary`], not the full
    /// `OrchestratorResult` `corrective::evaluate` wants, so the per-stage content it asks for is
    /// reconstructed from the single analysis output every stage actually validated.
    async fn evaluate_corrective(
        &self,
        task_id: &str,
        process_id: &str,
        analysis_type: AnalysisType,
        content: &str,
        qa: &crate::engine::QaSummary,
    ) {
        let Some(worst) = qa
            .stages
            .iter()
            .min_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
        else {
            return;
        };

        let synthetic = OrchestratorResult {
            results: qa
                .stages
                .iter()
                .map(|s| StageOutcome {
                    stage: s.stage,
                    response: ValidationResult {
                        stage: s.stage,
                        passed: s.confidence >= NON_EMPTY_CONFIDENCE,
                        confidence: s.confidence,
                        issues: Vec::new(),
                        corrected_output: None,
                        content: content.to_string(),
                    },
                })
                .collect(),
            aggregate_confidence: qa.aggregate_confidence,
            context: None,
        };

        let config = CorrectiveTriggerConfig {
            aggregate_threshold: self.corrective_aggregate_threshold,
            queue_name: corrective_queue_name(worst.stage, analysis_type),
        };

        match corrective::evaluate(self.store.as_ref(), &config, task_id, &synthetic).await {
            Ok(decision) if decision.triggered => {
                self.metrics
                    .corrective_triggers_total
                    .with_label_values(&[analysis_type.as_str()])
                    .inc();
                if let Err(error) = self
                    .state
                    .append_audit(
                        process_id,
                        CORRECTIVE_TRIGGERED,
                        Some(serde_json::json!({"stage": worst.stage.as_str(), "queue": config.queue_name})),
                    )
                    .await
                {
                    warn!(task_id, %error, "failed to append corrective-trigger audit event");
                }
            }
            Ok(_) => {}
            Err(error) => warn!(task_id, %error, "corrective trigger evaluation failed"),
        }
    }
}
