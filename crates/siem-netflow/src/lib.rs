//! NetFlow datagram decoding: v5 (24-byte header + 48-byte fixed records)
//! and v9/IPFIX (template-cached).
//!
//! No external NetFlow crate: the wire layouts are fixed-width and direct
//! `byteorder` cursor reads are clearer than fitting them through a parser
//! combinator or a derive macro built for a different field set.

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr};

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

pub mod template;

pub use template::{FlowFieldValue, TemplateCache};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("datagram too short: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("unsupported NetFlow version: {0}")]
    UnsupportedVersion(u16),
    #[error("malformed field while reading a flow record: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

const V5_HEADER_LEN: usize = 24;
const V5_RECORD_LEN: usize = 48;

const TCP_FLAG_NAMES: [(u8, &str); 8] = [
    (0x01, "FIN"),
    (0x02, "SYN"),
    (0x04, "RST"),
    (0x08, "PSH"),
    (0x10, "ACK"),
    (0x20, "URG"),
    (0x40, "ECE"),
    (0x80, "CWR"),
];

/// Renders raw TCP flags both as a comma-joined set-of-names and as
/// two-digit hex.
pub fn render_tcp_flags(raw: u8) -> (String, String) {
    let names: Vec<&str> = TCP_FLAG_NAMES
        .iter()
        .filter(|(bit, _)| raw & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    (names.join(","), format!("{raw:02X}"))
}

/// `event_time_ms = unix_secs*1000 + (flow_switched_ms - sys_uptime_ms)`:
/// `first_switched`/`last_switched` are router uptimes at switch time, so
/// anchoring them against the header's `(sys_uptime, unix_secs)` snapshot
/// yields an absolute wall-clock instant. Signed because a flow switched
/// before the snapshot yields a negative delta.
pub fn reconstruct_event_time_ms(unix_secs: u32, sys_uptime_ms: u32, flow_switched_ms: u32) -> i64 {
    unix_secs as i64 * 1000 + (flow_switched_ms as i64 - sys_uptime_ms as i64)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V5Header {
    pub version: u16,
    pub count: u16,
    pub sys_uptime_ms: u32,
    pub unix_secs: u32,
    pub unix_nsecs: u32,
    pub flow_sequence: u32,
    pub engine_type: u8,
    pub engine_id: u8,
    pub sampling: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V5Record {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub input_if: u16,
    pub output_if: u16,
    pub packets: u32,
    pub octets: u32,
    pub first_switched_ms: u32,
    pub last_switched_ms: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp_flags: u8,
    pub protocol: u8,
    pub tos: u8,
    pub src_as: u16,
    pub dst_as: u16,
    pub src_mask: u8,
    pub dst_mask: u8,
}

/// One fully reconstructed NetFlow v5 flow, exporter-addressed and with
/// absolute (not router-uptime-relative) event timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedV5Flow {
    pub exporter_ip: IpAddr,
    pub exporter_port: u16,
    pub record: V5Record,
    pub event_time_start_ms: i64,
    pub event_time_end_ms: i64,
    pub flow_duration_ms: Option<i64>,
    pub tcp_flags_names: String,
    pub tcp_flags_hex: String,
}

fn read_v5_header(cursor: &mut Cursor<&[u8]>) -> Result<V5Header> {
    Ok(V5Header {
        version: cursor.read_u16::<BigEndian>()?,
        count: cursor.read_u16::<BigEndian>()?,
        sys_uptime_ms: cursor.read_u32::<BigEndian>()?,
        unix_secs: cursor.read_u32::<BigEndian>()?,
        unix_nsecs: cursor.read_u32::<BigEndian>()?,
        flow_sequence: cursor.read_u32::<BigEndian>()?,
        engine_type: cursor.read_u8()?,
        engine_id: cursor.read_u8()?,
        sampling: cursor.read_u16::<BigEndian>()?,
    })
}

fn read_v5_record(cursor: &mut Cursor<&[u8]>) -> Result<V5Record> {
    let src_addr = Ipv4Addr::from(cursor.read_u32::<BigEndian>()?);
    let dst_addr = Ipv4Addr::from(cursor.read_u32::<BigEndian>()?);
    let next_hop = Ipv4Addr::from(cursor.read_u32::<BigEndian>()?);
    let input_if = cursor.read_u16::<BigEndian>()?;
    let output_if = cursor.read_u16::<BigEndian>()?;
    let packets = cursor.read_u32::<BigEndian>()?;
    let octets = cursor.read_u32::<BigEndian>()?;
    let first_switched_ms = cursor.read_u32::<BigEndian>()?;
    let last_switched_ms = cursor.read_u32::<BigEndian>()?;
    let src_port = cursor.read_u16::<BigEndian>()?;
    let dst_port = cursor.read_u16::<BigEndian>()?;
    cursor.read_u8()?; // pad1
    let tcp_flags = cursor.read_u8()?;
    let protocol = cursor.read_u8()?;
    let tos = cursor.read_u8()?;
    let src_as = cursor.read_u16::<BigEndian>()?;
    let dst_as = cursor.read_u16::<BigEndian>()?;
    let src_mask = cursor.read_u8()?;
    let dst_mask = cursor.read_u8()?;
    // pad2 (u16) is skipped by the caller, which owns the cursor position.
    Ok(V5Record {
        src_addr,
        dst_addr,
        next_hop,
        input_if,
        output_if,
        packets,
        octets,
        first_switched_ms,
        last_switched_ms,
        src_port,
        dst_port,
        tcp_flags,
        protocol,
        tos,
        src_as,
        dst_as,
        src_mask,
        dst_mask,
    })
}

/// Decodes a raw NetFlow v5 datagram into `header.count` reconstructed
/// flows. `exporter` is the router's `(ip, port)` the datagram arrived
/// from.
pub fn decode_v5(data: &[u8], exporter_ip: IpAddr, exporter_port: u16) -> Result<Vec<DecodedV5Flow>> {
    if data.len() < V5_HEADER_LEN {
        return Err(DecodeError::Truncated {
            need: V5_HEADER_LEN,
            got: data.len(),
        });
    }
    let mut cursor = Cursor::new(data);
    let header = read_v5_header(&mut cursor)?;
    if header.version != 5 {
        return Err(DecodeError::UnsupportedVersion(header.version));
    }

    let need = V5_HEADER_LEN + header.count as usize * V5_RECORD_LEN;
    if data.len() < need {
        return Err(DecodeError::Truncated {
            need,
            got: data.len(),
        });
    }

    let mut flows = Vec::with_capacity(header.count as usize);
    for _ in 0..header.count {
        let record = read_v5_record(&mut cursor)?;
        cursor.read_u16::<BigEndian>()?; // pad2

        let start = reconstruct_event_time_ms(header.unix_secs, header.sys_uptime_ms, record.first_switched_ms);
        let end = reconstruct_event_time_ms(header.unix_secs, header.sys_uptime_ms, record.last_switched_ms);
        let duration = if record.last_switched_ms >= record.first_switched_ms {
            Some(end - start)
        } else {
            None
        };
        let (names, hex) = render_tcp_flags(record.tcp_flags);

        flows.push(DecodedV5Flow {
            exporter_ip,
            exporter_port,
            record,
            event_time_start_ms: start,
            event_time_end_ms: end,
            flow_duration_ms: duration,
            tcp_flags_names: names,
            tcp_flags_hex: hex,
        });
    }
    Ok(flows)
}
