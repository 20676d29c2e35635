//! Batch scheduler over prompt preparation, model invocation and QA (C7).
//!
//! GPU ids are assigned synchronously, in submission order, before any concurrent task is
//! spawned, so the sequence is deterministic regardless of completion order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::config_registry::{AnalysisType, ConfigRegistry, QAStage};
use crate::error::WorkerError;
use crate::model_caller::{call_with_timeout, ChatMessage, ModelProvider, ModelRequest, ModelResponse};
use crate::prompt::prepare_run;
use crate::qa::{QaOrchestrator, ValidationContext};

/// Analysis types for which temperature is bumped by +0.1 (clamped to [0.1, 0.3]) before the
/// model is invoked. Kept as a named constant rather than a config field per the source's
/// "descriptive types" heuristic, which is coupled to exactly these three types.
pub const DESCRIPTIVE_ANALYSIS_TYPES: [AnalysisType; 3] = [
    AnalysisType::Captions,
    AnalysisType::SceneDescription,
    AnalysisType::Themes,
];

const DESCRIPTIVE_TEMPERATURE_MIN: f64 = 0.1;
const DESCRIPTIVE_TEMPERATURE_MAX: f64 = 0.3;
const DESCRIPTIVE_TEMPERATURE_BUMP: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub analysis_type: AnalysisType,
    pub base64_image: String,
}

#[derive(Debug, Clone)]
pub struct StageConfidence {
    pub stage: QAStage,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct QaSummary {
    pub aggregate_confidence: f64,
    pub stages: Vec<StageConfidence>,
}

#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub analysis_type: AnalysisType,
    pub success: bool,
    pub content: Option<String>,
    pub confidence: Option<f64>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub raw: Option<ModelResponse>,
    pub gpu_id: usize,
    pub qa: Option<QaSummary>,
}

impl AnalysisResult {
    fn failure(analysis_type: AnalysisType, gpu_id: usize, duration_ms: u64, error: String) -> Self {
        Self {
            analysis_type,
            success: false,
            content: None,
            confidence: None,
            duration_ms,
            error: Some(error),
            raw: None,
            gpu_id,
            qa: None,
        }
    }
}

pub struct Engine {
    registry: Arc<ConfigRegistry>,
    provider: Arc<dyn ModelProvider>,
    qa: Option<Arc<QaOrchestrator>>,
    semaphore: Arc<Semaphore>,
    gpu_cores: usize,
    job_timeout: Duration,
    gpu_counter: AtomicUsize,
}

impl Engine {
    #[must_use]
    pub fn new(
        registry: Arc<ConfigRegistry>,
        provider: Arc<dyn ModelProvider>,
        qa: Option<Arc<QaOrchestrator>>,
        max_concurrency: usize,
        gpu_cores: usize,
        job_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            provider,
            qa,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            gpu_cores: gpu_cores.max(1),
            job_timeout,
            gpu_counter: AtomicUsize::new(0),
        }
    }

    fn next_gpu_id(&self) -> usize {
        self.gpu_counter.fetch_add(1, Ordering::SeqCst) % self.gpu_cores
    }

    /// Apply the descriptive-type temperature bump (§5, Open Questions). Exposed so the queue
    /// dispatch path (C8) can reproduce the same tuning without going through a full `Engine`.
    #[must_use]
    pub fn effective_temperature(analysis_type: AnalysisType, configured: f64) -> f64 {
        if DESCRIPTIVE_ANALYSIS_TYPES.contains(&analysis_type) {
            (configured + DESCRIPTIVE_TEMPERATURE_BUMP)
                .clamp(DESCRIPTIVE_TEMPERATURE_MIN, DESCRIPTIVE_TEMPERATURE_MAX)
        } else {
            configured
        }
    }

    async fn run_job(&self, job: &AnalysisJob, gpu_id: usize) -> AnalysisResult {
        let started = Instant::now();

        let prepared = match prepare_run(&self.registry, job.analysis_type, &job.base64_image, None) {
            Ok(prepared) => prepared,
            Err(e) => {
                return AnalysisResult::failure(
                    job.analysis_type,
                    gpu_id,
                    started.elapsed().as_millis() as u64,
                    e.to_string(),
                )
            }
        };

        let temperature = Self::effective_temperature(job.analysis_type, prepared.model_params.temperature);
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

        let outcome = call_with_timeout(self.provider.as_ref(), request, self.job_timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(response) => response,
            Err(WorkerError::Timeout(timeout)) => {
                return AnalysisResult::failure(
                    job.analysis_type,
                    gpu_id,
                    duration_ms,
                    format!("timeout after {}s", timeout.as_secs_f64()),
                )
            }
            Err(e) => return AnalysisResult::failure(job.analysis_type, gpu_id, duration_ms, e.to_string()),
        };

        let content = response.first_content().to_string();
        let confidence = if content.is_empty() { 0.0 } else { 0.5 };

        let qa = if let Some(orchestrator) = &self.qa {
            let context = ValidationContext::new(job.analysis_type, prepared.config_version, content.clone());
            match orchestrator.run_sequential(context).await {
                Ok(result) => Some(QaSummary {
                    aggregate_confidence: result.aggregate_confidence,
                    stages: result
                        .results
                        .iter()
                        .map(|outcome| StageConfidence {
                            stage: outcome.stage,
                            confidence: outcome.response.confidence,
                        })
                        .collect(),
                }),
                Err(e) => {
                    return AnalysisResult::failure(job.analysis_type, gpu_id, duration_ms, e.to_string())
                }
            }
        } else {
            None
        };

        AnalysisResult {
            analysis_type: job.analysis_type,
            success: true,
            content: Some(content),
            confidence: Some(confidence),
            duration_ms,
            error: None,
            raw: Some(response),
            gpu_id,
            qa,
        }
    }

    /// Run every job as a concurrent task bounded by the engine's semaphore. GPU ids are
    /// assigned up front, in submission order, so the returned sequence of `gpu_id`s is
    /// deterministic regardless of which job finishes first. Partial failures are reported
    /// per-job; no job failure aborts the batch.
    pub async fn run_batch(&self, jobs: Vec<AnalysisJob>) -> Vec<AnalysisResult> {
        let assigned: Vec<(AnalysisJob, usize)> = jobs
            .into_iter()
            .map(|job| {
                let gpu_id = self.next_gpu_id();
                (job, gpu_id)
            })
            .collect();

        let futures = assigned.iter().map(|(job, gpu_id)| async move {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .expect("engine semaphore is never closed");
            self.run_job(job, *gpu_id).await
        });

        join_all(futures).await
    }

    pub async fn run_single(&self, job: AnalysisJob) -> AnalysisResult {
        let gpu_id = self.next_gpu_id();
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("engine semaphore is never closed");
        self.run_job(&job, gpu_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    fn write_config(dir: &std::path::Path, analysis_type: &str) {
        let path = dir.join(format!("{analysis_type}.yaml"));
        let mut f = std::fs::File::create(path).unwrap();
        writeln!(
            f,
            r#"
analysis_type: {analysis_type}
version: "1.0.0"
model_configuration:
  model: vision-model
  temperature: 0.2
  top_p: 0.9
  top_k: 40
  num_ctx: 2048
vision_optimization:
  max_edge_pixels: 512
  preserve_aspect_ratio: true
parallel_processing:
  max_concurrency: 8
  timeout_seconds: 60
prompts:
  system_prompt: "analyze"
  user_prompt: "{{{{BASE64_IMAGE_PLACEHOLDER}}}}"
performance_targets:
  success_rate_target: 0.9
qa_stages: []
"#
        )
        .unwrap();
    }

    struct EchoProvider;

    #[async_trait]
    impl ModelProvider for EchoProvider {
        async fn invoke(&self, _request: ModelRequest) -> Result<ModelResponse, WorkerError> {
            Ok(ModelResponse {
                choices: vec![crate::model_caller::ModelResponseChoice {
                    message: crate::model_caller::ModelResponseMessage {
                        content: "ok".to_string(),
                    },
                }],
            })
        }
    }

    struct SlowProvider {
        delay: Duration,
        in_flight: Arc<StdAtomicUsize>,
        max_observed: Arc<StdAtomicUsize>,
    }

    #[async_trait]
    impl ModelProvider for SlowProvider {
        async fn invoke(&self, _request: ModelRequest) -> Result<ModelResponse, WorkerError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ModelResponse {
                choices: vec![crate::model_caller::ModelResponseChoice {
                    message: crate::model_caller::ModelResponseMessage {
                        content: "ok".to_string(),
                    },
                }],
            })
        }
    }

    struct NeverRespondsProvider {
        delay: Duration,
    }

    #[async_trait]
    impl ModelProvider for NeverRespondsProvider {
        async fn invoke(&self, _request: ModelRequest) -> Result<ModelResponse, WorkerError> {
            tokio::time::sleep(self.delay).await;
            Ok(ModelResponse { choices: vec![] })
        }
    }

    #[tokio::test]
    async fn gpu_ids_are_assigned_round_robin_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "captions");
        write_config(dir.path(), "objects");
        let registry = Arc::new(ConfigRegistry::load(dir.path()).unwrap());
        let engine = Engine::new(registry, Arc::new(EchoProvider), None, 8, 3, Duration::from_secs(5));

        let jobs = vec![
            AnalysisJob {
                analysis_type: AnalysisType::Captions,
                base64_image: "img".to_string(),
            },
            AnalysisJob {
                analysis_type: AnalysisType::Objects,
                base64_image: "img".to_string(),
            },
            AnalysisJob {
                analysis_type: AnalysisType::Captions,
                base64_image: "img".to_string(),
            },
            AnalysisJob {
                analysis_type: AnalysisType::Objects,
                base64_image: "img".to_string(),
            },
        ];

        let results = engine.run_batch(jobs).await;
        let gpu_ids: Vec<usize> = results.iter().map(|r| r.gpu_id).collect();
        assert_eq!(gpu_ids, vec![0, 1, 2, 0]);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn batch_never_exceeds_configured_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "captions");
        let registry = Arc::new(ConfigRegistry::load(dir.path()).unwrap());

        let in_flight = Arc::new(StdAtomicUsize::new(0));
        let max_observed = Arc::new(StdAtomicUsize::new(0));
        let provider = Arc::new(SlowProvider {
            delay: Duration::from_millis(10),
            in_flight: Arc::clone(&in_flight),
            max_observed: Arc::clone(&max_observed),
        });

        let engine = Engine::new(registry, provider, None, 2, 16, Duration::from_secs(5));
        let jobs = (0..6)
            .map(|_| AnalysisJob {
                analysis_type: AnalysisType::Captions,
                base64_image: "img".to_string(),
            })
            .collect();

        let results = engine.run_batch(jobs).await;
        assert_eq!(results.len(), 6);
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn timeout_produces_failure_with_timeout_substring() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "captions");
        let registry = Arc::new(ConfigRegistry::load(dir.path()).unwrap());
        let provider = Arc::new(NeverRespondsProvider {
            delay: Duration::from_millis(200),
        });
        let engine = Engine::new(registry, provider, None, 8, 16, Duration::from_millis(50));

        let result = engine
            .run_single(AnalysisJob {
                analysis_type: AnalysisType::Captions,
                base64_image: "img".to_string(),
            })
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("timeout"));
    }

    #[test]
    fn descriptive_types_bump_and_clamp_temperature() {
        let bumped = Engine::effective_temperature(AnalysisType::Captions, 0.9);
        assert!((bumped - DESCRIPTIVE_TEMPERATURE_MAX).abs() < 1e-9);

        let unchanged = Engine::effective_temperature(AnalysisType::Objects, 0.9);
        assert!((unchanged - 0.9).abs() < 1e-9);
    }
}
