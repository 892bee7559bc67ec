//! Syslog line parser: three formats tried in order, total in the sense
//! that it never panics and returns `None` rather than a partial result
//! when nothing matches.

use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const SEVERITY_NAMES: [&str; 8] = [
    "emergency", "alert", "critical", "error", "warning", "notice", "info", "debug",
];

/// Everything recovered from one syslog line, whichever of the three
/// accepted formats it matched.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSyslog {
    pub priority: Option<u16>,
    pub facility: Option<u8>,
    pub severity: Option<u8>,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub process_tag: Option<String>,
    pub process_name: Option<String>,
    pub pid: Option<u32>,
    pub message: String,
    pub reporter_ip: IpAddr,
    pub reporter_port: u16,
    pub raw_log: String,
    /// Vendor-shorthand topics, empty for the two RFC3164 formats.
    pub topics: Vec<String>,
    /// A topic name that matched a severity word, format 3 only.
    pub severity_name: Option<String>,
}

static RFC3164_TAGGED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^<(?P<pri>\d{1,3})>
        (?P<mon>[A-Za-z]{3})\s+(?P<day>\d{1,2})\s+
        (?P<h>\d{2}):(?P<m>\d{2}):(?P<s>\d{2})\s+
        (?P<host>\S+)\s+
        (?P<tag>[^\s\[:]+)(?:\[(?P<pid>\d+)\])?:\s?
        (?P<msg>.*)$
        ",
    )
    .unwrap()
});

static RFC3164_TAGLESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        ^<(?P<pri>\d{1,3})>
        (?P<mon>[A-Za-z]{3})\s+(?P<day>\d{1,2})\s+
        (?P<h>\d{2}):(?P<m>\d{2}):(?P<s>\d{2})\s+
        (?P<host>\S+)\s+
        (?P<msg>.*)$
        ",
    )
    .unwrap()
});

static LEADING_TAG_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<tag>[A-Za-z_][\w.\-]{0,31})(?:\[(?P<pid>\d+)\])?:?\s+(?P<rest>.*)$").unwrap()
});

static VENDOR_SHORTHAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<topics>[\w\-]+(?:,[\w\-]+)*)\s+(?P<msg>.+)$").unwrap()
});

fn month_index(mon: &str) -> Option<u32> {
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(mon))
        .map(|i| i as u32 + 1)
}

/// Attaches the current UTC year to a bare month/day/time. RFC3164 drops
/// the year, so a December line received in early January would land a
/// year in the future; a parse more than a day ahead of `now` is pulled
/// back to the previous year.
fn reconstruct_timestamp(mon: &str, day: u32, h: u32, m: u32, s: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let month = month_index(mon)?;
    let mut year = now.year();
    let mut candidate = build_date(year, month, day, h, m, s)?;
    if candidate > now + Duration::days(1) {
        year -= 1;
        candidate = build_date(year, month, day, h, m, s)?;
    }
    Some(candidate)
}

fn build_date(year: i32, month: u32, day: u32, h: u32, m: u32, s: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = date.and_hms_opt(h, m, s)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn derive_facility_severity(pri: u16) -> (u8, u8) {
    ((pri / 8) as u8, (pri % 8) as u8)
}

/// Parses one line against the three accepted formats, in order. `now` is
/// the receive time, used both as the vendor-shorthand timestamp and as
/// the anchor year for RFC3164's missing year.
pub fn parse_line(line: &str, receive_addr: SocketAddr, now: DateTime<Utc>) -> Option<ParsedSyslog> {
    let line = line.trim_end_matches(['\r', '\n']);

    if let Some(parsed) = parse_rfc3164_tagged(line, receive_addr, now) {
        return Some(parsed);
    }
    if let Some(parsed) = parse_rfc3164_tagless(line, receive_addr, now) {
        return Some(parsed);
    }
    parse_vendor_shorthand(line, receive_addr, now)
}

fn parse_rfc3164_tagged(line: &str, receive_addr: SocketAddr, now: DateTime<Utc>) -> Option<ParsedSyslog> {
    let caps = RFC3164_TAGGED.captures(line)?;
    let pri: u16 = caps.name("pri")?.as_str().parse().ok()?;
    let timestamp = reconstruct_timestamp(
        caps.name("mon")?.as_str(),
        caps.name("day")?.as_str().parse().ok()?,
        caps.name("h")?.as_str().parse().ok()?,
        caps.name("m")?.as_str().parse().ok()?,
        caps.name("s")?.as_str().parse().ok()?,
        now,
    )?;
    let (facility, severity) = derive_facility_severity(pri);
    let tag = caps.name("tag")?.as_str().to_string();
    let process_name = tag.split(',').next().map(str::to_string);
    let pid = caps.name("pid").and_then(|m| m.as_str().parse().ok());

    Some(ParsedSyslog {
        priority: Some(pri),
        facility: Some(facility),
        severity: Some(severity),
        timestamp,
        hostname: caps.name("host")?.as_str().to_string(),
        process_tag: Some(tag),
        process_name,
        pid,
        message: caps.name("msg")?.as_str().to_string(),
        reporter_ip: receive_addr.ip(),
        reporter_port: receive_addr.port(),
        raw_log: line.to_string(),
        topics: Vec::new(),
        severity_name: None,
    })
}

fn parse_rfc3164_tagless(line: &str, receive_addr: SocketAddr, now: DateTime<Utc>) -> Option<ParsedSyslog> {
    let caps = RFC3164_TAGLESS.captures(line)?;
    let pri: u16 = caps.name("pri")?.as_str().parse().ok()?;
    let timestamp = reconstruct_timestamp(
        caps.name("mon")?.as_str(),
        caps.name("day")?.as_str().parse().ok()?,
        caps.name("h")?.as_str().parse().ok()?,
        caps.name("m")?.as_str().parse().ok()?,
        caps.name("s")?.as_str().parse().ok()?,
        now,
    )?;
    let (facility, severity) = derive_facility_severity(pri);
    let raw_msg = caps.name("msg")?.as_str();

    // Try to recover process_tag from the leading word of the message.
    let (process_tag, process_name, pid, message) = match LEADING_TAG_SHAPE.captures(raw_msg) {
        Some(tag_caps) => {
            let tag = tag_caps.name("tag")?.as_str().to_string();
            let pid = tag_caps.name("pid").and_then(|m| m.as_str().parse().ok());
            let rest = tag_caps.name("rest")?.as_str().to_string();
            (Some(tag.clone()), Some(tag), pid, rest)
        }
        None => (None, None, None, raw_msg.to_string()),
    };

    Some(ParsedSyslog {
        priority: Some(pri),
        facility: Some(facility),
        severity: Some(severity),
        timestamp,
        hostname: caps.name("host")?.as_str().to_string(),
        process_tag,
        process_name,
        pid,
        message,
        reporter_ip: receive_addr.ip(),
        reporter_port: receive_addr.port(),
        raw_log: line.to_string(),
        topics: Vec::new(),
        severity_name: None,
    })
}

fn parse_vendor_shorthand(line: &str, receive_addr: SocketAddr, now: DateTime<Utc>) -> Option<ParsedSyslog> {
    let caps = VENDOR_SHORTHAND.captures(line)?;
    let topics: Vec<String> = caps
        .name("topics")?
        .as_str()
        .split(',')
        .map(str::to_string)
        .collect();
    let severity_name = topics
        .iter()
        .find(|t| SEVERITY_NAMES.iter().any(|s| s.eq_ignore_ascii_case(t)))
        .cloned();

    Some(ParsedSyslog {
        priority: None,
        facility: None,
        severity: None,
        timestamp: now,
        hostname: receive_addr.ip().to_string(),
        process_tag: None,
        process_name: None,
        pid: None,
        message: caps.name("msg")?.as_str().to_string(),
        reporter_ip: receive_addr.ip(),
        reporter_port: receive_addr.port(),
        raw_log: line.to_string(),
        topics,
        severity_name,
    })
}
