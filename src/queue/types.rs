//! Wire shapes for items travelling through the queue fabric.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config_registry::{AnalysisType, QAStage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub task_id: String,
    #[serde(default)]
    pub payload: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectiveQueueItem {
    pub task_id: String,
    pub analysis_type: AnalysisType,
    pub stage: QAStage,
    pub original_output: String,
    #[serde(default)]
    pub image_b64: Option<String>,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementQueueItem {
    pub task_id: String,
    pub reason: String,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}
