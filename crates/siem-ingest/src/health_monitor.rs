//! Health monitoring for the ingestion service: tracks a stall timer and a
//! rolling failure rate over normalized-vs-dead-lettered datagrams, and
//! reports degradation to the shared metrics registry.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::metrics::{HealthStatus, IngestMetrics};

/// Maximum gap between processed datagrams before the service is
/// considered stalled.
const DEFAULT_MAX_STALL_DURATION: Duration = Duration::from_secs(10);

/// Maximum dead-letter rate before the service is considered degraded.
const DEFAULT_MAX_FAILURE_RATE: f64 = 0.05;

pub struct HealthMonitor {
    metrics: IngestMetrics,
    last_event_time: Instant,
    max_stall_duration: Duration,
    total_events: u64,
    failed_events: u64,
    max_failure_rate: f64,
    current_status: HealthStatus,
}

impl HealthMonitor {
    pub fn new(metrics: IngestMetrics) -> Self {
        Self::with_config(metrics, DEFAULT_MAX_STALL_DURATION, DEFAULT_MAX_FAILURE_RATE)
    }

    pub fn with_config(metrics: IngestMetrics, max_stall_duration: Duration, max_failure_rate: f64) -> Self {
        metrics.set_health_status(HealthStatus::Healthy);
        Self {
            metrics,
            last_event_time: Instant::now(),
            max_stall_duration,
            total_events: 0,
            failed_events: 0,
            max_failure_rate,
            current_status: HealthStatus::Healthy,
        }
    }

    /// Records a datagram that was normalized and written successfully.
    pub fn record_success(&mut self) {
        self.last_event_time = Instant::now();
        self.total_events += 1;
        self.update_health();
    }

    /// Records a datagram that failed to parse, normalize, or write and
    /// was routed to the dead-letter index.
    pub fn record_failure(&mut self) {
        self.last_event_time = Instant::now();
        self.total_events += 1;
        self.failed_events += 1;
        self.update_health();
    }

    pub fn update_health(&mut self) {
        let new_status = self.calculate_health();
        if new_status != self.current_status {
            info!(old_status = ?self.current_status, new_status = ?new_status, "health status changed");
            self.current_status = new_status;
            self.metrics.set_health_status(new_status);
        }
    }

    fn calculate_health(&self) -> HealthStatus {
        let stalled = self.last_event_time.elapsed() > self.max_stall_duration;
        let failure_rate = self.failure_rate();

        if stalled {
            warn!(
                elapsed_secs = self.last_event_time.elapsed().as_secs(),
                max_stall_secs = self.max_stall_duration.as_secs(),
                "no datagrams processed recently"
            );
            return HealthStatus::Unhealthy;
        }

        if failure_rate > self.max_failure_rate {
            warn!(failure_rate, max_failure_rate = self.max_failure_rate, "high dead-letter rate");
            return HealthStatus::Degraded;
        }

        HealthStatus::Healthy
    }

    pub fn status(&self) -> HealthStatus {
        self.current_status
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_events > 0 {
            self.failed_events as f64 / self.total_events as f64
        } else {
            0.0
        }
    }

    pub fn time_since_last_event(&self) -> Duration {
        self.last_event_time.elapsed()
    }

    pub fn reset_counters(&mut self) {
        self.total_events = 0;
        self.failed_events = 0;
        self.last_event_time = Instant::now();
        self.current_status = HealthStatus::Healthy;
        self.metrics.set_health_status(HealthStatus::Healthy);
        info!("health monitor counters reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_monitor() -> HealthMonitor {
        let metrics = IngestMetrics::new().unwrap();
        HealthMonitor::new(metrics)
    }

    #[test]
    fn starts_healthy() {
        let monitor = create_test_monitor();
        assert_eq!(monitor.status(), HealthStatus::Healthy);
        assert_eq!(monitor.failure_rate(), 0.0);
    }

    #[test]
    fn record_success_keeps_healthy() {
        let mut monitor = create_test_monitor();
        monitor.record_success();
        assert_eq!(monitor.status(), HealthStatus::Healthy);
        assert_eq!(monitor.total_events, 1);
        assert_eq!(monitor.failed_events, 0);
    }

    #[test]
    fn record_failure_tracks_rate() {
        let mut monitor = create_test_monitor();
        monitor.record_failure();
        assert_eq!(monitor.total_events, 1);
        assert_eq!(monitor.failed_events, 1);
        assert_eq!(monitor.failure_rate(), 1.0);
    }

    #[test]
    fn failure_rate_above_threshold_degrades() {
        let mut monitor = create_test_monitor();
        for _ in 0..95 {
            monitor.record_success();
        }
        assert_eq!(monitor.status(), HealthStatus::Healthy);

        for _ in 0..5 {
            monitor.record_failure();
        }
        assert_eq!(monitor.status(), HealthStatus::Healthy);

        monitor.record_failure();
        assert_eq!(monitor.status(), HealthStatus::Degraded);
    }

    #[test]
    fn reset_counters_returns_to_healthy() {
        let mut monitor = create_test_monitor();
        monitor.record_success();
        monitor.record_failure();
        assert_eq!(monitor.total_events, 2);

        monitor.reset_counters();
        assert_eq!(monitor.total_events, 0);
        assert_eq!(monitor.failed_events, 0);
        assert_eq!(monitor.status(), HealthStatus::Healthy);
    }

    #[test]
    fn with_config_applies_custom_thresholds() {
        let metrics = IngestMetrics::new().unwrap();
        let monitor = HealthMonitor::with_config(metrics, Duration::from_secs(30), 0.10);
        assert_eq!(monitor.max_stall_duration, Duration::from_secs(30));
        assert_eq!(monitor.max_failure_rate, 0.10);
    }
}
