//! Ties the listeners, parsers, and normalizers to the document store:
//! receive -> parse -> normalize -> write, catching each failure and
//! routing it to the dead-letter index instead of dropping the datagram.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{instrument, warn};

use siem_netflow::decode_v5;
use siem_store::DocumentClient;
use siem_types::{event_type, CommonEvent, EventCategory, EventOutcome};

use crate::metrics::IngestMetrics;
use crate::normalize::{normalize_netflow, normalize_syslog};

pub const SYSLOG_EVENTS_INDEX: &str = "siem-syslog-events";
pub const NETFLOW_EVENTS_INDEX: &str = "siem-netflow-events";
pub const DEAD_LETTER_INDEX: &str = "siem-dead-letter-queue";

/// What became of one datagram, so the caller can feed its health
/// accounting without re-deriving the result from logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Every record in the datagram was normalized and written.
    Stored,
    /// At least one record was dead-lettered or lost to a store failure.
    Failed,
}

impl IngestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, IngestOutcome::Failed)
    }
}

/// Shared between the syslog and NetFlow listeners: one handler per
/// protocol, both funneling into the same write/dead-letter plumbing and
/// the same metrics registry.
pub struct IngestionService {
    store: Arc<dyn DocumentClient>,
    metrics: IngestMetrics,
}

impl IngestionService {
    pub fn new(store: Arc<dyn DocumentClient>, metrics: IngestMetrics) -> Self {
        Self { store, metrics }
    }

    /// Handles one syslog datagram. Never returns an error: a parse or
    /// normalization failure is routed to the dead-letter index instead
    /// of propagating, and the outcome tells the caller which way it went.
    #[instrument(skip(self, datagram))]
    pub async fn handle_syslog_datagram(&self, datagram: Vec<u8>, peer: SocketAddr) -> IngestOutcome {
        let started = Instant::now();
        let line = match std::str::from_utf8(&datagram) {
            Ok(line) => line.trim_end_matches(['\r', '\n']),
            Err(err) => {
                self.dead_letter(
                    String::from_utf8_lossy(&datagram).into_owned(),
                    peer,
                    event_type::SYSLOG_PROCESSING_ERROR,
                    &format!("datagram is not valid UTF-8: {err}"),
                )
                .await;
                return IngestOutcome::Failed;
            }
        };

        let parsed = match siem_syslog::parse_line(line, peer, Utc::now()) {
            Some(parsed) => parsed,
            None => {
                self.dead_letter(
                    line.to_string(),
                    peer,
                    event_type::SYSLOG_PARSING_FAILED,
                    "line did not match any known syslog format",
                )
                .await;
                return IngestOutcome::Failed;
            }
        };
        let raw_log = parsed.raw_log.clone();

        match normalize_syslog(parsed, Utc::now()) {
            Ok(event) => {
                self.metrics.record_event_normalized();
                self.metrics.observe_normalization_latency(started.elapsed().as_secs_f64());
                self.write_event(event, SYSLOG_EVENTS_INDEX).await
            }
            Err(err) => {
                self.dead_letter(
                    raw_log,
                    peer,
                    event_type::SYSLOG_NORMALIZATION_FAILED,
                    &err.to_string(),
                )
                .await;
                IngestOutcome::Failed
            }
        }
    }

    /// Handles one NetFlow v5 datagram (one or more flow records).
    /// Reports [`IngestOutcome::Failed`] if any record in it failed.
    #[instrument(skip(self, datagram))]
    pub async fn handle_netflow_datagram(&self, datagram: Vec<u8>, peer: SocketAddr) -> IngestOutcome {
        let started = Instant::now();
        let flows = match decode_v5(&datagram, peer.ip(), peer.port()) {
            Ok(flows) => flows,
            Err(err) => {
                self.dead_letter(
                    general_purpose_hex(&datagram),
                    peer,
                    event_type::NETFLOW_PROCESSING_ERROR,
                    &err.to_string(),
                )
                .await;
                return IngestOutcome::Failed;
            }
        };

        let mut outcome = IngestOutcome::Stored;
        for flow in flows {
            match normalize_netflow(flow, Utc::now()) {
                Ok(event) => {
                    self.metrics.record_event_normalized();
                    if self.write_event(event, NETFLOW_EVENTS_INDEX).await.is_failure() {
                        outcome = IngestOutcome::Failed;
                    }
                }
                Err(err) => {
                    self.dead_letter(
                        general_purpose_hex(&datagram),
                        peer,
                        event_type::NETFLOW_NORMALIZATION_FAILED,
                        &err.to_string(),
                    )
                    .await;
                    outcome = IngestOutcome::Failed;
                }
            }
        }
        self.metrics.observe_normalization_latency(started.elapsed().as_secs_f64());
        outcome
    }

    async fn write_event(&self, event: CommonEvent, index_prefix: &str) -> IngestOutcome {
        let index_date = event.index_date();
        let body = match serde_json::to_value(&event) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, index_prefix, "failed to serialize normalized event, dropping");
                self.metrics.record_store_error();
                return IngestOutcome::Failed;
            }
        };
        let started = Instant::now();
        let result = self.store.write_document(body, index_prefix, index_date).await;
        self.metrics.observe_store_write_latency(started.elapsed().as_secs_f64());
        match result {
            Ok(_) => {
                self.metrics.record_event_written();
                IngestOutcome::Stored
            }
            Err(err) => {
                warn!(error = %err, index_prefix, "failed to write normalized event, dropping");
                self.metrics.record_store_error();
                IngestOutcome::Failed
            }
        }
    }

    async fn dead_letter(&self, raw_log: String, peer: SocketAddr, reason: &'static str, detail: &str) {
        warn!(reason, detail, peer = %peer, "routing datagram to dead-letter queue");
        self.metrics.record_dead_lettered();
        let now = Utc::now();
        let mut additional_fields = Map::new();
        additional_fields.insert("failure_reason".to_string(), Value::String(detail.to_string()));

        let event = CommonEvent {
            id: None,
            timestamp: now,
            ingestion_timestamp: now,
            reporter_ip: peer.ip(),
            hostname: None,
            event_category: EventCategory::ErrorLog,
            event_type: reason.to_string(),
            event_action: None,
            event_outcome: EventOutcome::Failure,
            source_ip: None,
            source_port: None,
            destination_ip: None,
            destination_port: None,
            network_protocol: None,
            network_protocol_number: None,
            network_bytes_total: None,
            network_packets_total: None,
            tcp_flags: None,
            tcp_flags_hex: None,
            flow_start: None,
            flow_end: None,
            flow_duration_milliseconds: None,
            input_interface: None,
            output_interface: None,
            source_as: None,
            destination_as: None,
            source_mask: None,
            destination_mask: None,
            syslog_facility: None,
            syslog_severity_code: None,
            message: Some(detail.to_string()),
            tags: Default::default(),
            raw_log,
            additional_fields,
        };
        let body = match serde_json::to_value(&event) {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "failed to serialize dead-letter record");
                return;
            }
        };
        if let Err(err) = self.store.write_document(body, DEAD_LETTER_INDEX, now).await {
            warn!(error = %err, "failed to write dead-letter record");
            self.metrics.record_store_error();
        }
    }
}

fn general_purpose_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encoding_preserves_every_byte() {
        let data = vec![0u8, 255, 16];
        assert_eq!(general_purpose_hex(&data), "00ff10");
    }

    #[test]
    fn outcome_classifies_failure() {
        assert!(IngestOutcome::Failed.is_failure());
        assert!(!IngestOutcome::Stored.is_failure());
    }
}
