//! The `Agent` capability and the value types it exchanges with the orchestrator.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config_registry::{AnalysisType, QAStage};
use crate::error::WorkerError;

/// Carries everything a stage needs to validate one analysis output, plus the sequential-mode
/// accumulator of prior stages' `<stage>_content` entries.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub analysis_type: Option<AnalysisType>,
    pub config_version: String,
    pub original_response: String,
    pub image: Option<String>,
    pub accumulator: HashMap<String, String>,
}

impl ValidationContext {
    #[must_use]
    pub fn new(analysis_type: AnalysisType, config_version: String, original_response: String) -> Self {
        Self {
            analysis_type: Some(analysis_type),
            config_version,
            original_response,
            image: None,
            accumulator: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub stage: QAStage,
    pub passed: bool,
    pub confidence: f64,
    pub issues: Vec<String>,
    pub corrected_output: Option<String>,
    /// The content this stage produced; feeds the next stage's accumulator entry in sequential
    /// mode and the corrective trigger's per-stage payload.
    pub content: String,
}

/// One QA stage, polymorphic over the single capability the orchestrator needs: validate a
/// context and return a typed result. Registries keep this as `stage -> Arc<dyn Agent>` rather
/// than a class hierarchy.
#[async_trait]
pub trait Agent: Send + Sync {
    fn stage(&self) -> QAStage;
    async fn validate(&self, context: &ValidationContext) -> Result<ValidationResult, WorkerError>;
}
