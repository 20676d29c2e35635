//! A model-backed [`Agent`]: sends the stage's prompt to a [`ModelProvider`] and applies the
//! placeholder confidence heuristic the rest of the crate treats as settled (§5, Open Questions).
//!
//! Grounded on `original_source/app/agents/qa_content_quality.py::ContentQualityQAAgent.run`:
//! one model call per stage, `confidence=0.5` whenever the model returned non-empty content,
//! `0.0` otherwise. No scoring model or rubric is introduced beyond what the original does.

use std::time::Duration;

use async_trait::async_trait;

use crate::config_registry::QAStage;
use crate::error::WorkerError;
use crate::model_caller::{call_with_timeout, ChatMessage, ModelProvider, ModelRequest};

use super::agent::{Agent, ValidationContext, ValidationResult};

/// Fixed confidence awarded whenever the model returns any content at all. Mirrors the
/// original's unconditional `confidence=0.5` — there is no scoring model behind it.
const NON_EMPTY_CONFIDENCE: f64 = 0.5;
const EMPTY_CONFIDENCE: f64 = 0.0;

pub struct ModelBackedAgent {
    stage: QAStage,
    stage_prompt_prefix: String,
    model: String,
    temperature: f64,
    top_p: f64,
    top_k: u32,
    num_ctx: u32,
    timeout: Duration,
    provider: std::sync::Arc<dyn ModelProvider>,
}

impl ModelBackedAgent {
    #[must_use]
    pub fn new(
        stage: QAStage,
        stage_prompt_prefix: String,
        model: String,
        temperature: f64,
        top_p: f64,
        top_k: u32,
        num_ctx: u32,
        timeout: Duration,
        provider: std::sync::Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            stage,
            stage_prompt_prefix,
            model,
            temperature,
            top_p,
            top_k,
            num_ctx,
            timeout,
            provider,
        }
    }

    fn build_prompt(&self, context: &ValidationContext) -> String {
        let mut prompt = format!("{}\n\n{}", self.stage_prompt_prefix, context.original_response);
        for key in [
            "structural_content",
            "content_quality_content",
            "domain_expert_content",
        ] {
            if let Some(value) = context.accumulator.get(key) {
                prompt.push_str(&format!("\n\n{key}: {value}"));
            }
        }
        prompt
    }
}

#[async_trait]
impl Agent for ModelBackedAgent {
    fn stage(&self) -> QAStage {
        self.stage
    }

    async fn validate(&self, context: &ValidationContext) -> Result<ValidationResult, WorkerError> {
        let request = ModelRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: self.build_prompt(context),
            }],
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            num_ctx: self.num_ctx,
            num_predict: None,
        };

        let response = call_with_timeout(self.provider.as_ref(), request, self.timeout).await?;
        let content = response.first_content().to_string();
        let confidence = if content.is_empty() {
            EMPTY_CONFIDENCE
        } else {
            NON_EMPTY_CONFIDENCE
        };

        Ok(ValidationResult {
            stage: self.stage,
            passed: confidence >= NON_EMPTY_CONFIDENCE,
            confidence,
            issues: if content.is_empty() {
                vec!["model returned no content".to_string()]
            } else {
                Vec::new()
            },
            corrected_output: None,
            content,
        })
    }
}
