//! Prometheus metrics for the elector

use crate::error::{ElectorError, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::info;

const NAMESPACE: &str = "elector";

/// Label naming the kind of record written to the store
pub const LABEL_RESOURCE_TYPE: &str = "resource_type";

/// Fire-and-forget counters the candidate reports to
pub trait MetricsSink: Send + Sync {
    /// This candidate created the election record
    fn election_won(&self);

    /// Another candidate held or created the election record first
    fn election_lost(&self);

    /// A record of `resource_type` was written to the store
    fn record_written(&self, resource_type: &str);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn election_won(&self) {}
    fn election_lost(&self) {}
    fn record_written(&self, _resource_type: &str) {}
}

/// Election counters in an owned registry
#[derive(Clone)]
pub struct PrometheusMetrics {
    elections_won: IntCounter,
    elections_lost: IntCounter,
    resources_written: IntCounterVec,
    registry: Registry,
}

impl PrometheusMetrics {
    /// Create the counters and register them
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let elections_won = IntCounter::with_opts(
            Opts::new("elections_won", "number of elections won").namespace(NAMESPACE),
        )?;
        let elections_lost = IntCounter::with_opts(
            Opts::new("elections_lost", "number of elections lost").namespace(NAMESPACE),
        )?;
        let resources_written = IntCounterVec::new(
            Opts::new(
                "kubernetes_resources_written",
                "number of kubernetes resources written to the cluster",
            )
            .namespace(NAMESPACE),
            &[LABEL_RESOURCE_TYPE],
        )?;

        registry.register(Box::new(elections_won.clone()))?;
        registry.register(Box::new(elections_lost.clone()))?;
        registry.register(Box::new(resources_written.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        info!("Election metrics initialized");

        Ok(Self {
            elections_won,
            elections_lost,
            resources_written,
            registry,
        })
    }

    pub fn elections_won(&self) -> u64 {
        self.elections_won.get()
    }

    pub fn elections_lost(&self) -> u64 {
        self.elections_lost.get()
    }

    pub fn resources_written(&self, resource_type: &str) -> u64 {
        self.resources_written
            .with_label_values(&[resource_type])
            .get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ElectorError::internal(format!("Failed to encode metrics: {}", e)))
    }
}

impl MetricsSink for PrometheusMetrics {
    fn election_won(&self) {
        self.elections_won.inc();
    }

    fn election_lost(&self) {
        self.elections_lost.inc();
    }

    fn record_written(&self, resource_type: &str) {
        self.resources_written
            .with_label_values(&[resource_type])
            .inc();
    }
}
