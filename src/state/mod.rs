//! Append-only state-recording interface for task/process/QA-attempt/audit events (C10).
//!
//! Ships as a trait set plus an in-memory reference adapter; no SQL driver is linked in, per the
//! persistence non-goal. Grounded on the teacher's `store/dao/traits.rs` flat-file-per-trait
//! layout (one trait per concern, re-exported from this module) and `store/dao/mock.rs`'s
//! stub-impl idiom for the reference adapter.

mod memory;
mod service;
mod traits;
mod types;

pub use memory::InMemoryStateStore;
pub use service::{audit_event, StateService};
pub use traits::{AuditDao, ProcessDao, QaAttemptDao, TaskDao};
pub use types::{AuditLog, ProcessState, ProcessingState, QaAttempt, Task, TaskStatus};
