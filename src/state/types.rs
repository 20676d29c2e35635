//! Value types recorded by the state interface. Mirrors the logical schema in §6: `tasks`,
//! `processing_state`, `qa_attempts`, `audit_logs` — documented for interface fidelity, not
//! backed by any SQL driver in this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config_registry::{AnalysisType, QAStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Started,
    Running,
    Completed,
    Failed,
}

impl ProcessState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Completed | ProcessState::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub analysis_type: AnalysisType,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingState {
    pub process_id: String,
    pub task_id: String,
    pub worker_id: String,
    pub state: ProcessState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaAttempt {
    pub attempt_id: String,
    pub task_id: String,
    pub qa_stage: QAStage,
    pub validation_result: Value,
    pub failure_reasons: Option<Vec<String>>,
    pub corrective_prompt_used: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub log_id: String,
    pub process_id: String,
    pub event_type: String,
    pub event_data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}
