//! Data model for per-analysis-type configuration (§3, §4.1 of the design doc).

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// The 21 fixed domains the system knows how to analyse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Activities,
    Ages,
    BodyShapes,
    Captions,
    Category,
    Colors,
    Composition,
    Emotions,
    Ethnicity,
    Events,
    Gender,
    Lighting,
    Locations,
    Objects,
    Occlusions,
    Outfits,
    Relationships,
    SceneDescription,
    Themes,
    TimeOfDay,
    Weather,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 21] = [
        AnalysisType::Activities,
        AnalysisType::Ages,
        AnalysisType::BodyShapes,
        AnalysisType::Captions,
        AnalysisType::Category,
        AnalysisType::Colors,
        AnalysisType::Composition,
        AnalysisType::Emotions,
        AnalysisType::Ethnicity,
        AnalysisType::Events,
        AnalysisType::Gender,
        AnalysisType::Lighting,
        AnalysisType::Locations,
        AnalysisType::Objects,
        AnalysisType::Occlusions,
        AnalysisType::Outfits,
        AnalysisType::Relationships,
        AnalysisType::SceneDescription,
        AnalysisType::Themes,
        AnalysisType::TimeOfDay,
        AnalysisType::Weather,
    ];

    /// The lowercase `snake_case` identifier used in queue names, file names and wire payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::Activities => "activities",
            AnalysisType::Ages => "ages",
            AnalysisType::BodyShapes => "body_shapes",
            AnalysisType::Captions => "captions",
            AnalysisType::Category => "category",
            AnalysisType::Colors => "colors",
            AnalysisType::Composition => "composition",
            AnalysisType::Emotions => "emotions",
            AnalysisType::Ethnicity => "ethnicity",
            AnalysisType::Events => "events",
            AnalysisType::Gender => "gender",
            AnalysisType::Lighting => "lighting",
            AnalysisType::Locations => "locations",
            AnalysisType::Objects => "objects",
            AnalysisType::Occlusions => "occlusions",
            AnalysisType::Outfits => "outfits",
            AnalysisType::Relationships => "relationships",
            AnalysisType::SceneDescription => "scene_description",
            AnalysisType::Themes => "themes",
            AnalysisType::TimeOfDay => "time_of_day",
            AnalysisType::Weather => "weather",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

/// One of the three sequential validation phases. Ordering is significant in sequential mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QAStage {
    Structural,
    ContentQuality,
    DomainExpert,
}

impl QAStage {
    /// Canonical execution order for sequential mode.
    pub const CANONICAL_ORDER: [QAStage; 3] = [
        QAStage::Structural,
        QAStage::ContentQuality,
        QAStage::DomainExpert,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QAStage::Structural => "structural",
            QAStage::ContentQuality => "content_quality",
            QAStage::DomainExpert => "domain_expert",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfiguration {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub num_ctx: u32,
    pub num_predict: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionOptimization {
    pub max_edge_pixels: u32,
    pub preserve_aspect_ratio: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelProcessing {
    pub max_concurrency: u32,
    pub worker_count: Option<u32>,
    pub batch_size: Option<u32>,
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompts {
    pub system_prompt: String,
    pub user_prompt: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConstraints {
    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceTargets {
    pub success_rate_target: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub description: Option<String>,
    #[serde(default)]
    pub analysis_type: Option<AnalysisType>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Per-analysis-type record loaded from external YAML. See §3 for field invariants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub analysis_type: AnalysisType,
    pub version: String,
    pub model_configuration: ModelConfiguration,
    pub vision_optimization: VisionOptimization,
    pub parallel_processing: ParallelProcessing,
    pub prompts: Prompts,
    #[serde(default)]
    pub validation_constraints: ValidationConstraints,
    pub performance_targets: PerformanceTargets,
    pub qa_stages: Vec<QAStage>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AnalysisConfig {
    /// Validate the invariants listed in §3 / §8. Called once per file on load and again on
    /// every hot-reload so a corrupt file never silently replaces a good snapshot.
    pub fn validate(&self) -> Result<(), WorkerError> {
        let type_name = self.analysis_type.as_str();

        if self.version.trim().is_empty() {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: version must be non-empty"
            )));
        }

        let mc = &self.model_configuration;
        if !(0.0..=2.0).contains(&mc.temperature) {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: temperature {} out of range [0,2]",
                mc.temperature
            )));
        }
        if !(0.0..=1.0).contains(&mc.top_p) {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: top_p {} out of range [0,1]",
                mc.top_p
            )));
        }
        if mc.num_ctx < 128 {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: num_ctx {} below minimum 128",
                mc.num_ctx
            )));
        }

        let vo = &self.vision_optimization;
        if !(64..=4096).contains(&vo.max_edge_pixels) {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: max_edge_pixels {} out of range [64,4096]",
                vo.max_edge_pixels
            )));
        }

        let pp = &self.parallel_processing;
        if !(1..=64).contains(&pp.max_concurrency) {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: max_concurrency {} out of range [1,64]",
                pp.max_concurrency
            )));
        }
        if let Some(wc) = pp.worker_count {
            if wc > 128 {
                return Err(WorkerError::ConfigInvalid(format!(
                    "{type_name}: worker_count {wc} exceeds maximum 128"
                )));
            }
        }
        if let Some(bs) = pp.batch_size {
            if bs > 1024 {
                return Err(WorkerError::ConfigInvalid(format!(
                    "{type_name}: batch_size {bs} exceeds maximum 1024"
                )));
            }
        }
        if pp.timeout_seconds < 1 {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: timeout_seconds must be >= 1"
            )));
        }

        if self.prompts.system_prompt.trim().is_empty() {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: prompts.system_prompt must be non-empty"
            )));
        }
        if self.prompts.user_prompt.trim().is_empty() {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: prompts.user_prompt must be non-empty"
            )));
        }

        let target = self.performance_targets.success_rate_target;
        if !(0.0..=1.0).contains(&target) {
            return Err(WorkerError::ConfigInvalid(format!(
                "{type_name}: success_rate_target {target} out of range [0,1]"
            )));
        }

        let mut seen_stages = std::collections::HashSet::new();
        for stage in &self.qa_stages {
            if !seen_stages.insert(*stage) {
                return Err(WorkerError::ConfigInvalid(format!(
                    "{type_name}: duplicate qa_stage {}",
                    stage.as_str()
                )));
            }
        }

        if let Some(meta_type) = self.metadata.analysis_type {
            if meta_type != self.analysis_type {
                return Err(WorkerError::ConfigInvalid(format!(
                    "{type_name}: metadata.analysis_type {} must match analysis_type",
                    meta_type.as_str()
                )));
            }
        }
        if let Some(meta_version) = &self.metadata.version {
            if meta_version != &self.version {
                return Err(WorkerError::ConfigInvalid(format!(
                    "{type_name}: metadata.version {meta_version} must match version {}",
                    self.version
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AnalysisConfig {
        AnalysisConfig {
            analysis_type: AnalysisType::Captions,
            version: "1.0.0".to_string(),
            model_configuration: ModelConfiguration {
                model: "vision-model".to_string(),
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                num_ctx: 4096,
                num_predict: None,
            },
            vision_optimization: VisionOptimization {
                max_edge_pixels: 1024,
                preserve_aspect_ratio: true,
            },
            parallel_processing: ParallelProcessing {
                max_concurrency: 8,
                worker_count: None,
                batch_size: None,
                timeout_seconds: 60,
            },
            prompts: Prompts {
                system_prompt: "system".to_string(),
                user_prompt: "user {{BASE64_IMAGE_PLACEHOLDER}}".to_string(),
            },
            validation_constraints: ValidationConstraints::default(),
            performance_targets: PerformanceTargets {
                success_rate_target: 0.9,
            },
            qa_stages: vec![QAStage::Structural, QAStage::ContentQuality],
            metadata: Metadata::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn temperature_out_of_range_is_rejected() {
        let mut cfg = valid_config();
        cfg.model_configuration.temperature = 2.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_qa_stages_are_rejected() {
        let mut cfg = valid_config();
        cfg.qa_stages = vec![QAStage::Structural, QAStage::Structural];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_system_prompt_is_rejected() {
        let mut cfg = valid_config();
        cfg.prompts.system_prompt = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mismatched_metadata_analysis_type_is_rejected() {
        let mut cfg = valid_config();
        cfg.metadata.analysis_type = Some(AnalysisType::Themes);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mismatched_metadata_version_is_rejected() {
        let mut cfg = valid_config();
        cfg.metadata.version = Some("2.0.0".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn matching_metadata_is_accepted() {
        let mut cfg = valid_config();
        cfg.metadata.analysis_type = Some(AnalysisType::Captions);
        cfg.metadata.version = Some("1.0.0".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn analysis_type_round_trips_through_str() {
        for t in AnalysisType::ALL {
            assert_eq!(AnalysisType::from_str(t.as_str()), Some(t));
        }
    }

    #[test]
    fn all_contains_exactly_21_types() {
        assert_eq!(AnalysisType::ALL.len(), 21);
    }
}
