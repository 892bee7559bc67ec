//! The canonical record every downstream component consumes.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level classification of a [`CommonEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Network,
    Authentication,
    Firewall,
    System,
    ErrorLog,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Network => "network",
            EventCategory::Authentication => "authentication",
            EventCategory::Firewall => "firewall",
            EventCategory::System => "system",
            EventCategory::ErrorLog => "error_log",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the action described by an event succeeded, failed, or is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Success,
    Failure,
    #[default]
    Unknown,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Success => "success",
            EventOutcome::Failure => "failure",
            EventOutcome::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Well-known dead-letter reasons, used as `event_type` when `event_category
/// == error_log`. Any other string is a legitimate protocol-specific
/// `event_type` (e.g. `"flow"`, `"logged_in"`).
pub mod event_type {
    pub const SYSLOG_PARSING_FAILED: &str = "syslog_parsing_failed";
    pub const SYSLOG_NORMALIZATION_FAILED: &str = "syslog_normalization_failed";
    pub const SYSLOG_PROCESSING_ERROR: &str = "syslog_processing_error";
    pub const NETFLOW_NORMALIZATION_FAILED: &str = "netflow_normalization_failed";
    pub const NETFLOW_PROCESSING_ERROR: &str = "netflow_processing_error";
    pub const FLOW: &str = "flow";
}

/// The normalized telemetry record produced by a syslog or NetFlow
/// normalizer, and the shape the correlation engine queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonEvent {
    /// Store-assigned id, present once the event has round-tripped through
    /// the document store's search API.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub timestamp: DateTime<Utc>,
    pub ingestion_timestamp: DateTime<Utc>,

    pub reporter_ip: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    pub event_category: EventCategory,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_action: Option<String>,
    pub event_outcome: EventOutcome,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_protocol_number: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_bytes_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_packets_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_flags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_flags_hex: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_duration_milliseconds: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_interface: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_interface: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_as: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_as: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_mask: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_mask: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub syslog_facility: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syslog_severity_code: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub tags: BTreeSet<String>,
    pub raw_log: String,

    #[serde(default)]
    pub additional_fields: Map<String, Value>,
}

impl CommonEvent {
    /// Returns the date the daily index name is computed from. `CommonEvent`
    /// always carries `timestamp`, so that is the sole source here; the
    /// `@timestamp`/`created_at_siem` fallback chain matters for `IoC`
    /// documents (see `ioc.rs`).
    pub fn index_date(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Selects and truncates fields for `Offence.triggering_event_summary`;
    /// every string value is capped at 250 chars.
    pub fn summarize(&self) -> Map<String, Value> {
        let mut summary = Map::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                summary.insert(key.to_string(), Value::String(truncate_250(&v)));
            }
        };
        put("event_category", Some(self.event_category.to_string()));
        put("event_type", Some(self.event_type.clone()));
        put("event_outcome", Some(self.event_outcome.to_string()));
        put("hostname", self.hostname.clone());
        put("source_ip", self.source_ip.map(|ip| ip.to_string()));
        put(
            "destination_ip",
            self.destination_ip.map(|ip| ip.to_string()),
        );
        put("message", self.message.clone());
        summary
    }
}

fn truncate_250(s: &str) -> String {
    if s.chars().count() <= 250 {
        s.to_string()
    } else {
        s.chars().take(250).collect()
    }
}
