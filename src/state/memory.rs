//! In-memory reference adapter for the four state-recording traits.
//!
//! Grounded on the teacher's `store/dao.rs` per-row-locked DAO shape, generalized off `sqlx`
//! since persistence is exposed only as an interface per the non-goals (no SQL driver ships).
//! Each row lives behind its own `dashmap` shard so unrelated tasks/processes never contend.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::WorkerError;

use super::traits::{AuditDao, ProcessDao, QaAttemptDao, TaskDao};
use super::types::{AuditLog, ProcessState, ProcessingState, QaAttempt, Task, TaskStatus};
use crate::config_registry::{AnalysisType, QAStage};

/// Reference implementation of the four state-recording traits, backed entirely by
/// process memory. No row outlives the process; every write is atomic per key via `dashmap`'s
/// per-shard locking, but cross-row consistency is only what callers build themselves (the
/// trait boundary admits, but does not itself implement, transactional grouping).
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    tasks: DashMap<String, Task>,
    processes: DashMap<String, ProcessingState>,
    qa_attempts: DashMap<String, QaAttempt>,
    audit_logs: DashMap<String, Vec<AuditLog>>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskDao for InMemoryStateStore {
    async fn create_task(&self, analysis_type: AnalysisType, status: TaskStatus) -> Result<String, WorkerError> {
        let task_id = Uuid::new_v4().to_string();
        let now = crate::util::time::now();
        self.tasks.insert(
            task_id.clone(),
            Task {
                task_id: task_id.clone(),
                analysis_type,
                status,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(task_id)
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<(), WorkerError> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| WorkerError::NotFound(format!("task {task_id}")))?;
        entry.status = status;
        entry.updated_at = crate::util::time::now();
        Ok(())
    }
}

#[async_trait]
impl ProcessDao for InMemoryStateStore {
    async fn create_process(&self, task_id: &str, worker_id: &str, state: ProcessState) -> Result<String, WorkerError> {
        let process_id = Uuid::new_v4().to_string();
        let now = crate::util::time::now();
        self.processes.insert(
            process_id.clone(),
            ProcessingState {
                process_id: process_id.clone(),
                task_id: task_id.to_string(),
                worker_id: worker_id.to_string(),
                state,
                started_at: now,
                finished_at: if state.is_terminal() { Some(now) } else { None },
            },
        );
        Ok(process_id)
    }

    async fn update_process(&self, process_id: &str, state: ProcessState) -> Result<(), WorkerError> {
        let mut entry = self
            .processes
            .get_mut(process_id)
            .ok_or_else(|| WorkerError::NotFound(format!("process {process_id}")))?;
        entry.state = state;
        if state.is_terminal() {
            entry.finished_at = Some(crate::util::time::now());
        }
        Ok(())
    }
}

#[async_trait]
impl QaAttemptDao for InMemoryStateStore {
    async fn log_qa_attempt(
        &self,
        task_id: &str,
        stage: QAStage,
        validation_result: serde_json::Value,
        failure_reasons: Option<Vec<String>>,
        corrective_prompt_used: Option<String>,
    ) -> Result<String, WorkerError> {
        let attempt_id = Uuid::new_v4().to_string();
        self.qa_attempts.insert(
            attempt_id.clone(),
            QaAttempt {
                attempt_id: attempt_id.clone(),
                task_id: task_id.to_string(),
                qa_stage: stage,
                validation_result,
                failure_reasons,
                corrective_prompt_used,
                created_at: crate::util::time::now(),
            },
        );
        Ok(attempt_id)
    }
}

#[async_trait]
impl AuditDao for InMemoryStateStore {
    async fn append_audit(
        &self,
        process_id: &str,
        event_type: &str,
        event_data: Option<serde_json::Value>,
    ) -> Result<String, WorkerError> {
        let log_id = Uuid::new_v4().to_string();
        let entry = AuditLog {
            log_id: log_id.clone(),
            process_id: process_id.to_string(),
            event_type: event_type.to_string(),
            event_data,
            timestamp: crate::util::time::now(),
        };
        self.audit_logs.entry(process_id.to_string()).or_default().push(entry);
        Ok(log_id)
    }

    async fn list_audit(&self, process_id: &str) -> Result<Vec<AuditLog>, WorkerError> {
        Ok(self
            .audit_logs
            .get(process_id)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }
}
