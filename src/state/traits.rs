//! Focused, single-responsibility traits for state recording, one per domain area.

use async_trait::async_trait;

use crate::config_registry::{AnalysisType, QAStage};
use crate::error::WorkerError;

use super::types::{AuditLog, ProcessState, TaskStatus};

#[async_trait]
pub trait TaskDao: Send + Sync {
    async fn create_task(&self, analysis_type: AnalysisType, status: TaskStatus) -> Result<String, WorkerError>;

    /// Fails with [`WorkerError::NotFound`] if no such task exists.
    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<(), WorkerError>;
}

#[async_trait]
pub trait ProcessDao: Send + Sync {
    async fn create_process(&self, task_id: &str, worker_id: &str, state: ProcessState) -> Result<String, WorkerError>;

    /// Transitioning into `completed` or `failed` stamps a finish time.
    async fn update_process(&self, process_id: &str, state: ProcessState) -> Result<(), WorkerError>;
}

#[async_trait]
pub trait QaAttemptDao: Send + Sync {
    async fn log_qa_attempt(
        &self,
        task_id: &str,
        stage: QAStage,
        validation_result: serde_json::Value,
        failure_reasons: Option<Vec<String>>,
        corrective_prompt_used: Option<String>,
    ) -> Result<String, WorkerError>;
}

#[async_trait]
pub trait AuditDao: Send + Sync {
    async fn append_audit(
        &self,
        process_id: &str,
        event_type: &str,
        event_data: Option<serde_json::Value>,
    ) -> Result<String, WorkerError>;

    async fn list_audit(&self, process_id: &str) -> Result<Vec<AuditLog>, WorkerError>;
}
