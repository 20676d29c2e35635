//! Per-analysis-type configuration: schema, atomic registry, and hot-reload watcher.

mod loader;
mod schema;
mod watch;

pub use loader::ConfigRegistry;
pub use schema::{
    AnalysisConfig, AnalysisType, Metadata, ModelConfiguration, ParallelProcessing,
    PerformanceTargets, Prompts, QAStage, ValidationConstraints, VisionOptimization,
};
pub use watch::spawn_watcher;
