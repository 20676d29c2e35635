//! The 87-queue fabric: naming, wire item shapes, and the in-memory store backing them.

mod names;
mod store;
mod types;

pub use names::{
    all_queue_names, analysis_queue_name, corrective_queue_name, MANAGEMENT_BATCH_COMPLETION,
    MANAGEMENT_MANUAL_REVIEW, MANAGEMENT_PRIORITY_PROCESSING,
};
pub use store::{dequeue_typed, enqueue, InMemoryQueueStore, QueueStore};
pub use types::{CorrectiveQueueItem, ManagementQueueItem, QueueItem};
