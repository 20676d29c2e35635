pub(crate) mod metrics;
pub(crate) mod tracing;

use std::sync::Arc;

use anyhow::Result;
use prometheus::Registry;

pub(crate) use self::metrics::Metrics;

/// Owns the process's tracing subscriber and metrics registry. Constructed once at startup.
#[derive(Debug, Clone)]
pub struct Telemetry {
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// Initialize tracing and build the metrics registry. Idempotent: calling this more than
    /// once (e.g. across tests in the same binary) reuses the already-installed subscriber.
    pub fn new() -> Result<Self> {
        tracing::init()?;
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(Arc::clone(&registry))?);
        Ok(Self { metrics })
    }

    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// A cheaply-cloned handle for components that outlive the borrow of `&self`.
    #[must_use]
    pub(crate) fn metrics_handle(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }
}
