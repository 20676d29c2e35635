//! Resolves a loaded config into a ready-to-send model request.
//!
//! Grounded on `original_source/app/pipeline_integration.py::prepare_run`: templating stays a
//! deliberately minimal literal string-replace rather than a templating-engine dependency, and
//! no prompt text is ever hardcoded in code — every prompt comes out of the loaded config.

use std::collections::HashMap;

use serde::Serialize;

use crate::config_registry::{AnalysisConfig, AnalysisType, ConfigRegistry};
use crate::error::WorkerError;

pub const BASE64_IMAGE_PLACEHOLDER: &str = "{{BASE64_IMAGE_PLACEHOLDER}}";

/// A reserved one-pixel transparent PNG, base64-encoded. Used only when the prompt preparer is
/// exercised without a real image supplied (local/offline use); the job lifecycle driver (C11)
/// always supplies a real image in production use, so this constant never reaches a provider.
pub const PLACEHOLDER_IMAGE_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

#[derive(Debug, Clone, Serialize)]
pub struct ModelParams {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub num_ctx: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub analysis_type: AnalysisType,
    pub model_params: ModelParams,
    pub system_prompt: String,
    pub user_prompt: String,
    pub config_version: String,
}

fn render_prompt(template: &str, placeholders: &HashMap<&str, &str>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in placeholders {
        rendered = rendered.replace(key, value);
    }
    rendered
}

fn model_params_from_config(cfg: &AnalysisConfig) -> ModelParams {
    let mc = &cfg.model_configuration;
    ModelParams {
        model: mc.model.clone(),
        temperature: mc.temperature,
        top_p: mc.top_p,
        top_k: mc.top_k,
        num_ctx: mc.num_ctx,
        num_predict: mc.num_predict,
    }
}

/// Resolve `analysis_type`'s config from `registry` and render its prompts against
/// `base64_image` plus any caller-supplied `extra_placeholders`.
pub fn prepare_run(
    registry: &ConfigRegistry,
    analysis_type: AnalysisType,
    base64_image: &str,
    extra_placeholders: Option<&HashMap<&str, &str>>,
) -> Result<PreparedRun, WorkerError> {
    let cfg = registry.get(analysis_type).ok_or_else(|| {
        WorkerError::NotFound(format!(
            "no config loaded for analysis_type {}",
            analysis_type.as_str()
        ))
    })?;

    let mut placeholders: HashMap<&str, &str> = HashMap::new();
    placeholders.insert(BASE64_IMAGE_PLACEHOLDER, base64_image);
    if let Some(extra) = extra_placeholders {
        placeholders.extend(extra);
    }

    let system_prompt = render_prompt(&cfg.prompts.system_prompt, &placeholders);
    let user_prompt = render_prompt(&cfg.prompts.user_prompt, &placeholders);

    Ok(PreparedRun {
        analysis_type: cfg.analysis_type,
        model_params: model_params_from_config(&cfg),
        system_prompt,
        user_prompt,
        config_version: cfg.version.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_captions_config(dir: &std::path::Path) {
        let path = dir.join("captions.yaml");
        let mut f = std::fs::File::create(path).unwrap();
        writeln!(
            f,
            r#"
analysis_type: captions
version: "2.0.0"
model_configuration:
  model: vision-model
  temperature: 0.3
  top_p: 0.95
  top_k: 40
  num_ctx: 4096
  num_predict: 256
vision_optimization:
  max_edge_pixels: 1024
  preserve_aspect_ratio: true
parallel_processing:
  max_concurrency: 8
  timeout_seconds: 60
prompts:
  system_prompt: "describe the image"
  user_prompt: "image data: {{{{BASE64_IMAGE_PLACEHOLDER}}}} style={{{{STYLE}}}}"
performance_targets:
  success_rate_target: 0.9
qa_stages: [structural]
"#
        )
        .unwrap();
    }

    #[test]
    fn substitutes_image_placeholder_literally() {
        let dir = tempfile::tempdir().unwrap();
        write_captions_config(dir.path());
        let registry = ConfigRegistry::load(dir.path()).unwrap();

        let run = prepare_run(&registry, AnalysisType::Captions, "abc123==", None).unwrap();
        assert!(run.user_prompt.contains("abc123=="));
        assert!(!run.user_prompt.contains("BASE64_IMAGE_PLACEHOLDER"));
    }

    #[test]
    fn extra_placeholders_are_substituted() {
        let dir = tempfile::tempdir().unwrap();
        write_captions_config(dir.path());
        let registry = ConfigRegistry::load(dir.path()).unwrap();

        let mut extra = HashMap::new();
        extra.insert("{{STYLE}}", "vivid");
        let run =
            prepare_run(&registry, AnalysisType::Captions, "img", Some(&extra)).unwrap();
        assert!(run.user_prompt.contains("style=vivid"));
    }

    #[test]
    fn num_predict_omitted_when_not_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ages.yaml");
        let mut f = std::fs::File::create(path).unwrap();
        writeln!(
            f,
            r#"
analysis_type: ages
version: "1.0.0"
model_configuration:
  model: vision-model
  temperature: 0.1
  top_p: 0.9
  top_k: 40
  num_ctx: 2048
vision_optimization:
  max_edge_pixels: 512
  preserve_aspect_ratio: true
parallel_processing:
  max_concurrency: 4
  timeout_seconds: 30
prompts:
  system_prompt: "estimate age"
  user_prompt: "{{{{BASE64_IMAGE_PLACEHOLDER}}}}"
performance_targets:
  success_rate_target: 0.85
qa_stages: []
"#
        )
        .unwrap();
        let registry = ConfigRegistry::load(dir.path()).unwrap();

        let run = prepare_run(&registry, AnalysisType::Ages, "img", None).unwrap();
        let serialized = serde_json::to_value(&run.model_params).unwrap();
        assert!(serialized.get("num_predict").is_none());
    }

    #[test]
    fn unknown_analysis_type_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        write_captions_config(dir.path());
        let registry = ConfigRegistry::load(dir.path()).unwrap();

        let result = prepare_run(&registry, AnalysisType::Weather, "img", None);
        assert!(matches!(result, Err(WorkerError::NotFound(_))));
    }
}
