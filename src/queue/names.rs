//! Fixed, externally-visible queue naming scheme.
//!
//! The topology is 21 analysis queues + 63 corrective queues (3 stages × 21 types) + 3
//! management queues = 87 total. Names are stable wire identifiers, not implementation detail.

use crate::config_registry::{AnalysisType, QAStage};

#[must_use]
pub fn analysis_queue_name(analysis_type: AnalysisType) -> String {
    format!("analysis:{}", analysis_type.as_str())
}

#[must_use]
pub fn corrective_queue_name(stage: QAStage, analysis_type: AnalysisType) -> String {
    format!("corrective:{}:{}", stage.as_str(), analysis_type.as_str())
}

pub const MANAGEMENT_MANUAL_REVIEW: &str = "mgmt:manual_review";
pub const MANAGEMENT_PRIORITY_PROCESSING: &str = "mgmt:priority_processing";
pub const MANAGEMENT_BATCH_COMPLETION: &str = "mgmt:batch_completion";

/// Every queue name in the fixed topology, in a stable order: analysis, then corrective grouped
/// by stage, then management. Used to build the worker coordinator's round-robin rotation and to
/// drive the queue monitor's sampling sweep.
#[must_use]
pub fn all_queue_names() -> Vec<String> {
    let mut names = Vec::with_capacity(87);
    for t in AnalysisType::ALL {
        names.push(analysis_queue_name(t));
    }
    for stage in QAStage::CANONICAL_ORDER {
        for t in AnalysisType::ALL {
            names.push(corrective_queue_name(stage, t));
        }
    }
    names.push(MANAGEMENT_MANUAL_REVIEW.to_string());
    names.push(MANAGEMENT_PRIORITY_PROCESSING.to_string());
    names.push(MANAGEMENT_BATCH_COMPLETION.to_string());
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_queue_count_is_87() {
        assert_eq!(all_queue_names().len(), 87);
    }

    #[test]
    fn names_are_unique() {
        let names = all_queue_names();
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn analysis_name_shape() {
        assert_eq!(
            analysis_queue_name(AnalysisType::Captions),
            "analysis:captions"
        );
    }

    #[test]
    fn corrective_name_shape() {
        assert_eq!(
            corrective_queue_name(QAStage::Structural, AnalysisType::Captions),
            "corrective:structural:captions"
        );
    }

    #[test]
    fn management_names_are_fixed() {
        assert_eq!(MANAGEMENT_MANUAL_REVIEW, "mgmt:manual_review");
        assert_eq!(MANAGEMENT_PRIORITY_PROCESSING, "mgmt:priority_processing");
        assert_eq!(MANAGEMENT_BATCH_COMPLETION, "mgmt:batch_completion");
    }
}
