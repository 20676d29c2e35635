//! Facade over the four DAOs, owning the audit-event-type naming convention used by the rest
//! of the crate so call sites never hand-write event-type strings.

use std::sync::Arc;

use crate::config_registry::{AnalysisType, QAStage};
use crate::error::WorkerError;

use super::traits::{AuditDao, ProcessDao, QaAttemptDao, TaskDao};
use super::types::{AuditLog, ProcessState, TaskStatus};

/// Event-type strings recorded via [`StateService::append_audit`]. Centralized here so the
/// engine, worker coordinator and job driver never invent their own spellings.
pub mod audit_event {
    pub const TASK_CREATED: &str = "task_created";
    pub const PROCESS_STARTED: &str = "process_started";
    pub const PROCESS_COMPLETED: &str = "process_completed";
    pub const PROCESS_FAILED: &str = "process_failed";
    pub const QA_ATTEMPT_LOGGED: &str = "qa_attempt_logged";
    pub const CORRECTIVE_TRIGGERED: &str = "corrective_triggered";
}

/// Bundles the four DAO traits behind one handle components can depend on instead of four
/// separate `Arc<dyn ...>` fields.
pub struct StateService {
    task_dao: Arc<dyn TaskDao>,
    process_dao: Arc<dyn ProcessDao>,
    qa_attempt_dao: Arc<dyn QaAttemptDao>,
    audit_dao: Arc<dyn AuditDao>,
}

impl StateService {
    #[must_use]
    pub fn new<T>(store: Arc<T>) -> Self
    where
        T: TaskDao + ProcessDao + QaAttemptDao + AuditDao + 'static,
    {
        Self {
            task_dao: Arc::clone(&store) as Arc<dyn TaskDao>,
            process_dao: Arc::clone(&store) as Arc<dyn ProcessDao>,
            qa_attempt_dao: Arc::clone(&store) as Arc<dyn QaAttemptDao>,
            audit_dao: store as Arc<dyn AuditDao>,
        }
    }

    pub async fn create_task(&self, analysis_type: AnalysisType, status: TaskStatus) -> Result<String, WorkerError> {
        self.task_dao.create_task(analysis_type, status).await
    }

    pub async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<(), WorkerError> {
        self.task_dao.update_task_status(task_id, status).await
    }

    pub async fn create_process(&self, task_id: &str, worker_id: &str, state: ProcessState) -> Result<String, WorkerError> {
        let process_id = self.process_dao.create_process(task_id, worker_id, state).await?;
        self.audit_dao
            .append_audit(&process_id, audit_event::PROCESS_STARTED, None)
            .await?;
        Ok(process_id)
    }

    /// Transition `process_id` into `state`, appending the matching audit event when the
    /// transition is terminal (`completed` or `failed`).
    pub async fn update_process(&self, process_id: &str, state: ProcessState) -> Result<(), WorkerError> {
        self.process_dao.update_process(process_id, state).await?;
        let event = match state {
            ProcessState::Completed => Some(audit_event::PROCESS_COMPLETED),
            ProcessState::Failed => Some(audit_event::PROCESS_FAILED),
            ProcessState::Started | ProcessState::Running => None,
        };
        if let Some(event) = event {
            self.audit_dao.append_audit(process_id, event, None).await?;
        }
        Ok(())
    }

    pub async fn log_qa_attempt(
        &self,
        task_id: &str,
        stage: QAStage,
        validation_result: serde_json::Value,
        failure_reasons: Option<Vec<String>>,
        corrective_prompt_used: Option<String>,
    ) -> Result<String, WorkerError> {
        self.qa_attempt_dao
            .log_qa_attempt(task_id, stage, validation_result, failure_reasons, corrective_prompt_used)
            .await
    }

    pub async fn append_audit(
        &self,
        process_id: &str,
        event_type: &str,
        event_data: Option<serde_json::Value>,
    ) -> Result<String, WorkerError> {
        self.audit_dao.append_audit(process_id, event_type, event_data).await
    }

    pub async fn list_audit(&self, process_id: &str) -> Result<Vec<AuditLog>, WorkerError> {
        self.audit_dao.list_audit(process_id).await
    }
}
