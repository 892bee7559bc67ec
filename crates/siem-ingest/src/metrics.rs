//! Prometheus metrics for the ingestion path.

use std::sync::Arc;

use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};

/// Counters/gauges/histograms covering both listeners and the document
/// store writer, exported on the same registry the metrics/health HTTP
/// server serves.
#[derive(Clone)]
pub struct IngestMetrics {
    pub datagrams_received_total: Counter,
    pub events_normalized_total: Counter,
    pub events_written_total: Counter,
    pub events_dead_lettered_total: Counter,
    pub store_errors_total: Counter,

    pub worker_pool_in_use: Gauge,
    pub health_status: Gauge,

    pub normalization_latency_seconds: Histogram,
    pub store_write_latency_seconds: Histogram,

    pub registry: Arc<Registry>,
}

impl IngestMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let datagrams_received_total = Counter::with_opts(Opts::new(
            "siem_ingest_datagrams_received_total",
            "Total UDP datagrams received by either listener",
        ))?;
        registry.register(Box::new(datagrams_received_total.clone()))?;

        let events_normalized_total = Counter::with_opts(Opts::new(
            "siem_ingest_events_normalized_total",
            "Total events successfully normalized into CommonEvent",
        ))?;
        registry.register(Box::new(events_normalized_total.clone()))?;

        let events_written_total = Counter::with_opts(Opts::new(
            "siem_ingest_events_written_total",
            "Total normalized events written to the document store",
        ))?;
        registry.register(Box::new(events_written_total.clone()))?;

        let events_dead_lettered_total = Counter::with_opts(Opts::new(
            "siem_ingest_events_dead_lettered_total",
            "Total datagrams routed to the dead-letter index",
        ))?;
        registry.register(Box::new(events_dead_lettered_total.clone()))?;

        let store_errors_total = Counter::with_opts(Opts::new(
            "siem_ingest_store_errors_total",
            "Total document store write failures",
        ))?;
        registry.register(Box::new(store_errors_total.clone()))?;

        let worker_pool_in_use = Gauge::with_opts(Opts::new(
            "siem_ingest_worker_pool_in_use",
            "Number of concurrently in-flight datagram handlers",
        ))?;
        registry.register(Box::new(worker_pool_in_use.clone()))?;

        let health_status = Gauge::with_opts(Opts::new(
            "siem_ingest_health_status",
            "Service health status (1.0=healthy, 0.5=degraded, 0.0=unhealthy)",
        ))?;
        registry.register(Box::new(health_status.clone()))?;

        let normalization_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "siem_ingest_normalization_latency_seconds",
                "Time spent parsing and normalizing one datagram",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )?;
        registry.register(Box::new(normalization_latency_seconds.clone()))?;

        let store_write_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "siem_ingest_store_write_latency_seconds",
                "Document store write latency",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
        )?;
        registry.register(Box::new(store_write_latency_seconds.clone()))?;

        Ok(Self {
            datagrams_received_total,
            events_normalized_total,
            events_written_total,
            events_dead_lettered_total,
            store_errors_total,
            worker_pool_in_use,
            health_status,
            normalization_latency_seconds,
            store_write_latency_seconds,
            registry: Arc::new(registry),
        })
    }

    pub fn record_datagram_received(&self) {
        self.datagrams_received_total.inc();
    }

    pub fn record_event_normalized(&self) {
        self.events_normalized_total.inc();
    }

    pub fn record_event_written(&self) {
        self.events_written_total.inc();
    }

    pub fn record_dead_lettered(&self) {
        self.events_dead_lettered_total.inc();
    }

    pub fn record_store_error(&self) {
        self.store_errors_total.inc();
    }

    pub fn set_worker_pool_in_use(&self, count: usize) {
        self.worker_pool_in_use.set(count as f64);
    }

    pub fn set_health_status(&self, status: HealthStatus) {
        let value = match status {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Unhealthy => 0.0,
        };
        self.health_status.set(value);
    }

    pub fn observe_normalization_latency(&self, duration_secs: f64) {
        self.normalization_latency_seconds.observe(duration_secs);
    }

    pub fn observe_store_write_latency(&self, duration_secs: f64) {
        self.store_write_latency_seconds.observe(duration_secs);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new().expect("failed to construct ingest metrics registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registers_every_metric_without_name_collisions() {
        let metrics = IngestMetrics::new().unwrap();
        assert_eq!(metrics.datagrams_received_total.get(), 0.0);
    }

    #[test]
    fn counters_increment_independently() {
        let metrics = IngestMetrics::new().unwrap();
        metrics.record_datagram_received();
        metrics.record_event_normalized();
        metrics.record_dead_lettered();
        assert_eq!(metrics.datagrams_received_total.get(), 1.0);
        assert_eq!(metrics.events_normalized_total.get(), 1.0);
        assert_eq!(metrics.events_dead_lettered_total.get(), 1.0);
        assert_eq!(metrics.events_written_total.get(), 0.0);
    }

    #[test]
    fn health_status_maps_to_expected_values() {
        let metrics = IngestMetrics::new().unwrap();
        metrics.set_health_status(HealthStatus::Healthy);
        assert_eq!(metrics.health_status.get(), 1.0);
        metrics.set_health_status(HealthStatus::Degraded);
        assert_eq!(metrics.health_status.get(), 0.5);
        metrics.set_health_status(HealthStatus::Unhealthy);
        assert_eq!(metrics.health_status.get(), 0.0);
    }
}
