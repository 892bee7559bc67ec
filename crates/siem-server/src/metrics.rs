//! Daemon-level metrics layered on top of [`siem_ingest::IngestMetrics`]:
//! correlation-cycle counters/timers, registered on their own registry so
//! the `/metrics` handler can gather both and concatenate the output.

use std::sync::Arc;

use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use siem_ingest::IngestMetrics;

pub struct ServerMetrics {
    pub ingest: Arc<IngestMetrics>,
    pub correlation_cycles_total: Counter,
    pub correlation_offences_created_total: Counter,
    pub correlation_cycle_duration_seconds: Histogram,
    local_registry: Registry,
}

impl ServerMetrics {
    pub fn new(ingest: Arc<IngestMetrics>) -> Result<Self, prometheus::Error> {
        let local_registry = Registry::new();

        let correlation_cycles_total = Counter::with_opts(Opts::new(
            "siem_correlation_cycles_total",
            "Total correlation cycles run",
        ))?;
        local_registry.register(Box::new(correlation_cycles_total.clone()))?;

        let correlation_offences_created_total = Counter::with_opts(Opts::new(
            "siem_correlation_offences_created_total",
            "Total offences created across all correlation cycles",
        ))?;
        local_registry.register(Box::new(correlation_offences_created_total.clone()))?;

        let correlation_cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "siem_correlation_cycle_duration_seconds",
                "Wall-clock time spent evaluating one correlation cycle",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]),
        )?;
        local_registry.register(Box::new(correlation_cycle_duration_seconds.clone()))?;

        Ok(Self {
            ingest,
            correlation_cycles_total,
            correlation_offences_created_total,
            correlation_cycle_duration_seconds,
            local_registry,
        })
    }

    /// Renders both the ingest and daemon-local registries as one
    /// Prometheus exposition-format body.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        for registry in [self.ingest.registry.as_ref(), &self.local_registry] {
            let _ = encoder.encode(&registry.gather(), &mut buffer);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// `1.0`/`0.5`/`0.0` healthy/degraded/unhealthy, mirrored from the
    /// ingest health gauge, the one daemon-wide signal `/healthz` reports.
    pub fn is_healthy(&self) -> bool {
        self.ingest.health_status.get() > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_text_includes_both_registries() {
        let ingest = Arc::new(IngestMetrics::new().unwrap());
        let metrics = ServerMetrics::new(ingest).unwrap();
        metrics.correlation_cycles_total.inc();
        let text = metrics.gather_text();
        assert!(text.contains("siem_correlation_cycles_total"));
        assert!(text.contains("siem_ingest_health_status"));
    }

    #[test]
    fn is_healthy_reflects_ingest_gauge() {
        let ingest = Arc::new(IngestMetrics::new().unwrap());
        let metrics = ServerMetrics::new(ingest).unwrap();
        metrics.ingest.set_health_status(siem_ingest::HealthStatus::Healthy);
        assert!(metrics.is_healthy());
        metrics.ingest.set_health_status(siem_ingest::HealthStatus::Unhealthy);
        assert!(!metrics.is_healthy());
    }
}
