//! Pure normalizers: syslog/NetFlow -> [`CommonEvent`]. No I/O, so every
//! classification rule is unit-testable without a store.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Map;

use siem_netflow::DecodedV5Flow;
use siem_syslog::ParsedSyslog;
use siem_types::{event_type, CommonEvent, EventCategory, EventOutcome};

use crate::error::NormalizationError;

static IP_FLOW_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<sip>\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(?P<sport>\d+)->(?P<dip>\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(?P<dport>\d+)").unwrap()
});

static PROTO_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)proto\s+(?P<proto>[A-Za-z0-9]+)").unwrap());

struct Classification {
    category: EventCategory,
    event_type: &'static str,
    action: Option<&'static str>,
    outcome: EventOutcome,
}

/// Syslog classification heuristics, applied over the tag/topics and
/// message text: firewall verbs first, then login phrasing, then the
/// system fallback.
fn classify(tag: Option<&str>, topics: &[String], message: &str) -> Classification {
    let haystack = format!(
        "{} {} {}",
        tag.unwrap_or_default(),
        topics.join(" "),
        message
    )
    .to_lowercase();

    if haystack.contains("firewall") {
        if haystack.contains("drop") || haystack.contains("reject") {
            return Classification {
                category: EventCategory::Firewall,
                event_type: "firewall_drop",
                action: Some("denied"),
                outcome: EventOutcome::Failure,
            };
        }
        if haystack.contains("accept") || haystack.contains("allow") {
            return Classification {
                category: EventCategory::Firewall,
                event_type: "firewall_allow",
                action: Some("allowed"),
                outcome: EventOutcome::Success,
            };
        }
        return Classification {
            category: EventCategory::Firewall,
            event_type: "firewall_event",
            action: None,
            outcome: EventOutcome::Unknown,
        };
    }

    if haystack.contains("logged in") || haystack.contains("login failure") {
        let outcome = if haystack.contains("failed") {
            EventOutcome::Failure
        } else {
            EventOutcome::Success
        };
        return Classification {
            category: EventCategory::Authentication,
            event_type: if outcome == EventOutcome::Failure {
                "login_failure"
            } else {
                "logged_in"
            },
            action: None,
            outcome,
        };
    }

    // Neither heuristic matched. "system" covers both the tag-says-system
    // case and the unclassified passthrough; there is no separate
    // "unclassified" category.
    Classification {
        category: EventCategory::System,
        event_type: "syslog_message",
        action: None,
        outcome: EventOutcome::Unknown,
    }
}

/// Normalizes one parsed syslog line into a [`CommonEvent`].
pub fn normalize_syslog(parsed: ParsedSyslog, ingestion_timestamp: DateTime<Utc>) -> Result<CommonEvent, NormalizationError> {
    let classification = classify(parsed.process_tag.as_deref(), &parsed.topics, &parsed.message);

    let flow = IP_FLOW_PATTERN.captures(&parsed.message);
    let source_ip: Option<IpAddr> = flow.as_ref().and_then(|c| c.name("sip")?.as_str().parse().ok());
    let source_port: Option<u16> = flow.as_ref().and_then(|c| c.name("sport")?.as_str().parse().ok());
    let destination_ip: Option<IpAddr> = flow.as_ref().and_then(|c| c.name("dip")?.as_str().parse().ok());
    let destination_port: Option<u16> = flow.as_ref().and_then(|c| c.name("dport")?.as_str().parse().ok());
    let network_protocol = PROTO_PATTERN
        .captures(&parsed.message)
        .and_then(|c| c.name("proto").map(|m| m.as_str().to_uppercase()));

    Ok(CommonEvent {
        id: None,
        timestamp: parsed.timestamp,
        ingestion_timestamp,
        reporter_ip: parsed.reporter_ip,
        hostname: Some(parsed.hostname),
        event_category: classification.category,
        event_type: classification.event_type.to_string(),
        event_action: classification.action.map(str::to_string),
        event_outcome: classification.outcome,
        source_ip,
        source_port,
        destination_ip,
        destination_port,
        network_protocol,
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
        syslog_facility: parsed.facility,
        syslog_severity_code: parsed.severity,
        message: Some(parsed.message),
        tags: BTreeSet::new(),
        raw_log: parsed.raw_log,
        additional_fields: Map::new(),
    })
}

/// Normalizes one reconstructed NetFlow v5 record into a [`CommonEvent`].
/// NetFlow events always carry `event_category=network`, `event_type=flow`.
pub fn normalize_netflow(flow: DecodedV5Flow, ingestion_timestamp: DateTime<Utc>) -> Result<CommonEvent, NormalizationError> {
    let start = ms_to_datetime(flow.event_time_start_ms)
        .ok_or_else(|| NormalizationError::NetflowNormalizationFailed("event_time_start_ms out of range".into()))?;
    let end = ms_to_datetime(flow.event_time_end_ms)
        .ok_or_else(|| NormalizationError::NetflowNormalizationFailed("event_time_end_ms out of range".into()))?;

    let network_protocol = protocol_name(flow.record.protocol);

    Ok(CommonEvent {
        id: None,
        // The event timestamp is when the flow ended, not when it began.
        timestamp: end,
        ingestion_timestamp,
        reporter_ip: flow.exporter_ip,
        hostname: None,
        event_category: EventCategory::Network,
        event_type: event_type::FLOW.to_string(),
        event_action: None,
        event_outcome: EventOutcome::Unknown,
        source_ip: Some(IpAddr::V4(flow.record.src_addr)),
        source_port: Some(flow.record.src_port),
        destination_ip: Some(IpAddr::V4(flow.record.dst_addr)),
        destination_port: Some(flow.record.dst_port),
        network_protocol: Some(network_protocol),
        network_protocol_number: Some(flow.record.protocol),
        network_bytes_total: Some(flow.record.octets as u64),
        network_packets_total: Some(flow.record.packets as u64),
        tcp_flags: Some(flow.tcp_flags_names),
        tcp_flags_hex: Some(flow.tcp_flags_hex),
        flow_start: Some(start),
        flow_end: Some(end),
        flow_duration_milliseconds: flow.flow_duration_ms,
        input_interface: Some(flow.record.input_if as u32),
        output_interface: Some(flow.record.output_if as u32),
        source_as: Some(flow.record.src_as as u32),
        destination_as: Some(flow.record.dst_as as u32),
        source_mask: Some(flow.record.src_mask),
        destination_mask: Some(flow.record.dst_mask),
        syslog_facility: None,
        syslog_severity_code: None,
        message: None,
        tags: BTreeSet::new(),
        raw_log: String::new(),
        additional_fields: Map::new(),
    })
}

fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn protocol_name(number: u8) -> String {
    match number {
        1 => "ICMP".to_string(),
        6 => "TCP".to_string(),
        17 => "UDP".to_string(),
        other => other.to_string(),
    }
}
