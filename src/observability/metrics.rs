//! Prometheus metric definitions (C13). Gathered in-process only; no HTTP exposition endpoint
//! ships, since the render/scrape surface is a non-goal (§9).
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_gauge_vec_with_registry, register_gauge_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Metrics {
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub jobs_retried: Counter,

    pub analysis_runs_total: CounterVec,
    pub analysis_duration: HistogramVec,
    pub qa_stage_confidence: HistogramVec,
    pub qa_aggregate_confidence: Histogram,
    pub corrective_triggers_total: CounterVec,
    pub config_reloads_total: Counter,
    pub config_reload_failures_total: Counter,

    pub queue_length: GaugeVec,
    pub active_workers: Gauge,
}

impl Metrics {
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            jobs_completed: register_counter_with_registry!(
                "vision_qa_worker_jobs_completed_total",
                "Total number of jobs completed by the job lifecycle driver",
                registry
            )?,
            jobs_failed: register_counter_with_registry!(
                "vision_qa_worker_jobs_failed_total",
                "Total number of jobs that failed during processing",
                registry
            )?,
            jobs_retried: register_counter_with_registry!(
                "vision_qa_worker_jobs_retried_total",
                "Total number of retried job-driver RPCs",
                registry
            )?,
            analysis_runs_total: register_counter_vec_with_registry!(
                "vision_qa_worker_analysis_runs_total",
                "Total number of analysis runs by analysis_type and outcome",
                &["analysis_type", "outcome"],
                registry
            )?,
            analysis_duration: register_histogram_vec_with_registry!(
                "vision_qa_worker_analysis_duration_seconds",
                "Duration of a single analysis run by analysis_type",
                &["analysis_type"],
                registry
            )?,
            qa_stage_confidence: register_histogram_vec_with_registry!(
                "vision_qa_worker_qa_stage_confidence",
                "Confidence score reported by a QA stage",
                &["stage"],
                registry
            )?,
            qa_aggregate_confidence: register_histogram_with_registry!(
                "vision_qa_worker_qa_aggregate_confidence",
                "Aggregate QA confidence across all stages that ran",
                registry
            )?,
            corrective_triggers_total: register_counter_vec_with_registry!(
                "vision_qa_worker_corrective_triggers_total",
                "Total number of corrective re-processing triggers by analysis_type",
                &["analysis_type"],
                registry
            )?,
            config_reloads_total: register_counter_with_registry!(
                "vision_qa_worker_config_reloads_total",
                "Total number of successful config hot-reloads",
                registry
            )?,
            config_reload_failures_total: register_counter_with_registry!(
                "vision_qa_worker_config_reload_failures_total",
                "Total number of config hot-reload attempts that failed validation",
                registry
            )?,
            queue_length: register_gauge_vec_with_registry!(
                "vision_qa_worker_queue_length",
                "Current length of a named queue in the fabric",
                &["queue"],
                registry
            )?,
            active_workers: register_gauge_with_registry!(
                "vision_qa_worker_active_workers",
                "Number of worker coordinator permits currently checked out",
                registry
            )?,
        })
    }
}

#[cfg(test)]
pub(crate) fn test_metrics() -> Arc<Metrics> {
    Arc::new(Metrics::new(Arc::new(Registry::new())).expect("metrics register against a fresh registry"))
}
