//! Loading and atomic hot-reload of the per-analysis-type config snapshot.
//!
//! Grounded on `original_source/app/config_loader.py::ConfigRegistry`: build the complete
//! replacement map off to the side, then swap it in under one write lock so a reader never
//! observes a half-loaded set and a failed reload leaves the previous snapshot untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::error::WorkerError;

use super::schema::{AnalysisConfig, AnalysisType};

type Snapshot = Arc<HashMap<AnalysisType, AnalysisConfig>>;

/// Holds the current complete snapshot of all loaded analysis configs.
pub struct ConfigRegistry {
    dir: PathBuf,
    snapshot: RwLock<Snapshot>,
}

impl ConfigRegistry {
    /// Load every `*.yaml` file under `dir` and build the initial snapshot.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, WorkerError> {
        let dir = dir.into();
        let snapshot = load_all(&dir)?;
        Ok(Self {
            dir,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Current config for an analysis type, if loaded.
    #[must_use]
    pub fn get(&self, analysis_type: AnalysisType) -> Option<AnalysisConfig> {
        let snapshot = self.snapshot.read().expect("config snapshot lock poisoned");
        snapshot.get(&analysis_type).cloned()
    }

    /// All currently loaded configs, as a stable point-in-time snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<HashMap<AnalysisType, AnalysisConfig>> {
        Arc::clone(&self.snapshot.read().expect("config snapshot lock poisoned"))
    }

    /// Re-scan the directory and atomically replace the snapshot.
    ///
    /// On any error (missing dir, invalid YAML, duplicate type) the previous snapshot is left
    /// completely intact — the new map is built off to the side and only swapped in on success.
    pub fn refresh(&self) -> Result<(), WorkerError> {
        let new_snapshot = match load_all(&self.dir) {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %err, dir = %self.dir.display(), "config refresh failed, keeping previous snapshot");
                return Err(err);
            }
        };
        let count = new_snapshot.len();
        *self.snapshot.write().expect("config snapshot lock poisoned") = Arc::new(new_snapshot);
        info!(count, dir = %self.dir.display(), "config snapshot refreshed");
        Ok(())
    }
}

fn load_all(dir: &Path) -> Result<HashMap<AnalysisType, AnalysisConfig>, WorkerError> {
    if !dir.is_dir() {
        return Err(WorkerError::ConfigInvalid(format!(
            "config directory {} does not exist",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        WorkerError::ConfigInvalid(format!("failed to read config dir {}: {e}", dir.display()))
    })?;

    let mut map = HashMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            WorkerError::ConfigInvalid(format!("failed to read dir entry: {e}"))
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            WorkerError::ConfigInvalid(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: AnalysisConfig = serde_yaml::from_str(&contents).map_err(|e| {
            WorkerError::ConfigInvalid(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;

        if let Some(existing) = map.insert(config.analysis_type, config) {
            return Err(WorkerError::ConfigDuplicateType(
                existing.analysis_type.as_str().to_string(),
            ));
        }
    }

    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, type_name: &str) {
        let path = dir.join(format!("{type_name}.yaml"));
        let mut file = std::fs::File::create(path).expect("create config file");
        writeln!(
            file,
            r#"
analysis_type: {type_name}
version: "1.0.0"
model_configuration:
  model: vision-model
  temperature: 0.2
  top_p: 0.9
  top_k: 40
  num_ctx: 4096
vision_optimization:
  max_edge_pixels: 1024
  preserve_aspect_ratio: true
parallel_processing:
  max_concurrency: 8
  timeout_seconds: 60
prompts:
  system_prompt: "system"
  user_prompt: "user {{{{BASE64_IMAGE_PLACEHOLDER}}}}"
performance_targets:
  success_rate_target: 0.9
qa_stages: [structural, content_quality]
"#
        )
        .expect("write config file");
    }

    #[test]
    fn load_all_reads_every_yaml_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(dir.path(), "captions");
        write_config(dir.path(), "ages");

        let registry = ConfigRegistry::load(dir.path()).expect("load registry");
        assert!(registry.get(AnalysisType::Captions).is_some());
        assert!(registry.get(AnalysisType::Ages).is_some());
        assert!(registry.get(AnalysisType::Weather).is_none());
    }

    #[test]
    fn duplicate_analysis_type_is_a_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(dir.path(), "captions");
        // second file declaring the same type under a different file name
        std::fs::copy(
            dir.path().join("captions.yaml"),
            dir.path().join("captions_dup.yaml"),
        )
        .expect("copy config file");

        let result = ConfigRegistry::load(dir.path());
        assert!(matches!(result, Err(WorkerError::ConfigDuplicateType(_))));
    }

    #[test]
    fn refresh_leaves_previous_snapshot_intact_on_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(dir.path(), "captions");
        let registry = ConfigRegistry::load(dir.path()).expect("load registry");
        assert!(registry.get(AnalysisType::Captions).is_some());

        // corrupt the directory: duplicate type triggers a refresh error
        std::fs::copy(
            dir.path().join("captions.yaml"),
            dir.path().join("captions_dup.yaml"),
        )
        .expect("copy config file");

        let err = registry.refresh();
        assert!(err.is_err());
        // previous snapshot is untouched
        assert!(registry.get(AnalysisType::Captions).is_some());
    }

    #[test]
    fn missing_directory_is_a_load_error() {
        let result = ConfigRegistry::load("/nonexistent/path/for/test");
        assert!(result.is_err());
    }
}
