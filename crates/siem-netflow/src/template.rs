//! v9/IPFIX template-cached decode: a per-exporter template cache keyed by
//! `(exporter_ip, exporter_port, template_id)`, and data FlowSet decode
//! against a small static table of the common IANA field numbers.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::warn;

use crate::{DecodeError, Result};

const TEMPLATE_FLOWSET_ID: u16 = 0;
const OPTIONS_TEMPLATE_FLOWSET_ID: u16 = 1;
const MIN_DATA_FLOWSET_ID: u16 = 256;

/// IANA-assigned information element numbers this decoder names.
mod iana {
    pub const OCTET_DELTA_COUNT: u16 = 1;
    pub const PACKET_DELTA_COUNT: u16 = 2;
    pub const PROTOCOL_IDENTIFIER: u16 = 4;
    pub const SOURCE_TRANSPORT_PORT: u16 = 7;
    pub const SOURCE_IPV4_ADDRESS: u16 = 8;
    pub const DESTINATION_TRANSPORT_PORT: u16 = 11;
    pub const DESTINATION_IPV4_ADDRESS: u16 = 12;
    pub const FLOW_START_SECONDS: u16 = 150;
}

fn field_name(field_type: u16) -> &'static str {
    match field_type {
        iana::OCTET_DELTA_COUNT => "octetDeltaCount",
        iana::PACKET_DELTA_COUNT => "packetDeltaCount",
        iana::PROTOCOL_IDENTIFIER => "protocolIdentifier",
        iana::SOURCE_TRANSPORT_PORT => "sourceTransportPort",
        iana::SOURCE_IPV4_ADDRESS => "sourceIPv4Address",
        iana::DESTINATION_TRANSPORT_PORT => "destinationTransportPort",
        iana::DESTINATION_IPV4_ADDRESS => "destinationIPv4Address",
        iana::FLOW_START_SECONDS => "flowStartSeconds",
        _ => "",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSpec {
    field_type: u16,
    length: u16,
}

/// A decoded data-record field value. `Bytes` is the fallback for field
/// widths/types this crate has no named interpretation for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowFieldValue {
    U64(u64),
    Ipv4(Ipv4Addr),
    Bytes(Vec<u8>),
}

/// Caches template FlowSets per exporter so later data FlowSets from the
/// same `(ip, port, template_id)` can be decoded. Exporters rotate
/// templates occasionally; a new template for the same id simply
/// overwrites the cached one.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: BTreeMap<(IpAddr, u16, u16), Vec<FieldSpec>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, exporter_ip: IpAddr, exporter_port: u16, template_id: u16, fields: Vec<FieldSpec>) {
        self.templates.insert((exporter_ip, exporter_port, template_id), fields);
    }

    fn get(&self, exporter_ip: IpAddr, exporter_port: u16, template_id: u16) -> Option<&Vec<FieldSpec>> {
        self.templates.get(&(exporter_ip, exporter_port, template_id))
    }
}

struct V9Header {
    count: u16,
}

fn read_v9_header(cursor: &mut Cursor<&[u8]>) -> Result<V9Header> {
    let _version = cursor.read_u16::<BigEndian>()?;
    let count = cursor.read_u16::<BigEndian>()?;
    let _sys_uptime_ms = cursor.read_u32::<BigEndian>()?;
    let _unix_secs = cursor.read_u32::<BigEndian>()?;
    let _sequence = cursor.read_u32::<BigEndian>()?;
    let _source_id = cursor.read_u32::<BigEndian>()?;
    Ok(V9Header { count })
}

fn decode_template_flowset(
    cursor: &mut Cursor<&[u8]>,
    flowset_end: u64,
    exporter_ip: IpAddr,
    exporter_port: u16,
    cache: &mut TemplateCache,
) -> Result<()> {
    while cursor.position() < flowset_end {
        let template_id = cursor.read_u16::<BigEndian>()?;
        let field_count = cursor.read_u16::<BigEndian>()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field_type = cursor.read_u16::<BigEndian>()?;
            let length = cursor.read_u16::<BigEndian>()?;
            fields.push(FieldSpec { field_type, length });
        }
        cache.insert(exporter_ip, exporter_port, template_id, fields);
    }
    Ok(())
}

fn decode_field(spec: FieldSpec, bytes: &[u8]) -> FlowFieldValue {
    match (spec.field_type, spec.length) {
        (iana::SOURCE_IPV4_ADDRESS, 4) | (iana::DESTINATION_IPV4_ADDRESS, 4) => {
            FlowFieldValue::Ipv4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
        }
        (_, 1) => FlowFieldValue::U64(bytes[0] as u64),
        (_, 2) => FlowFieldValue::U64(u16::from_be_bytes([bytes[0], bytes[1]]) as u64),
        (_, 4) => FlowFieldValue::U64(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64),
        (_, 8) => {
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&bytes[..8]);
            FlowFieldValue::U64(u64::from_be_bytes(arr))
        }
        _ => FlowFieldValue::Bytes(bytes.to_vec()),
    }
}

fn decode_data_flowset(
    cursor: &mut Cursor<&[u8]>,
    flowset_end: u64,
    template: &[FieldSpec],
) -> Result<Vec<BTreeMap<String, FlowFieldValue>>> {
    let mut records = Vec::new();
    let record_len: usize = template.iter().map(|f| f.length as usize).sum();
    if record_len == 0 {
        return Ok(records);
    }
    while cursor.position() + record_len as u64 <= flowset_end {
        let mut record = BTreeMap::new();
        for spec in template {
            let mut buf = vec![0u8; spec.length as usize];
            cursor.read_exact(&mut buf)?;
            let name = field_name(spec.field_type);
            let key = if name.is_empty() {
                format!("field_{}", spec.field_type)
            } else {
                name.to_string()
            };
            record.insert(key, decode_field(*spec, &buf));
        }
        records.push(record);
    }
    Ok(records)
}

/// Decodes a v9 datagram's FlowSets: template FlowSets update `cache`;
/// data FlowSets are decoded against the cached template and returned.
/// A data FlowSet whose template has not yet been seen from this exporter
/// is dropped with a warning, not treated as a fatal decode error;
/// exporters re-send templates periodically and the flow stream recovers.
pub fn decode_v9(
    data: &[u8],
    exporter_ip: IpAddr,
    exporter_port: u16,
    cache: &mut TemplateCache,
) -> Result<Vec<BTreeMap<String, FlowFieldValue>>> {
    let mut cursor = Cursor::new(data);
    let header = read_v9_header(&mut cursor)?;
    let mut all_records = Vec::new();

    for _ in 0..header.count {
        if cursor.position() as usize + 4 > data.len() {
            break;
        }
        let set_id = cursor.read_u16::<BigEndian>()?;
        let length = cursor.read_u16::<BigEndian>()?;
        let flowset_end = cursor.position() + length.saturating_sub(4) as u64;
        if flowset_end > data.len() as u64 {
            return Err(DecodeError::Truncated {
                need: flowset_end as usize,
                got: data.len(),
            });
        }

        match set_id {
            TEMPLATE_FLOWSET_ID => {
                decode_template_flowset(&mut cursor, flowset_end, exporter_ip, exporter_port, cache)?;
            }
            OPTIONS_TEMPLATE_FLOWSET_ID => {
                cursor.set_position(flowset_end);
            }
            template_id if template_id >= MIN_DATA_FLOWSET_ID => {
                match cache.get(exporter_ip, exporter_port, template_id).cloned() {
                    Some(template) => {
                        all_records.extend(decode_data_flowset(&mut cursor, flowset_end, &template)?);
                    }
                    None => {
                        warn!(exporter = %exporter_ip, template_id, "data flowset arrived before its template, dropping");
                    }
                }
                cursor.set_position(flowset_end);
            }
            other => {
                warn!(flowset_id = other, "unrecognized v9 flowset id, skipping");
                cursor.set_position(flowset_end);
            }
        }
    }

    Ok(all_records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn exporter() -> IpAddr {
        "10.1.1.1".parse().unwrap()
    }

    fn push_template_and_data() -> Vec<u8> {
        let mut buf = Vec::new();
        // header
        buf.write_u16::<BigEndian>(9).unwrap();
        buf.write_u16::<BigEndian>(2).unwrap(); // 2 flowsets
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u32::<BigEndian>(1).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();

        // template flowset: id=0, one template (id=256) with 2 fields
        let mut template_body = Vec::new();
        template_body.write_u16::<BigEndian>(256).unwrap(); // template_id
        template_body.write_u16::<BigEndian>(2).unwrap(); // field_count
        template_body.write_u16::<BigEndian>(iana::SOURCE_IPV4_ADDRESS).unwrap();
        template_body.write_u16::<BigEndian>(4).unwrap();
        template_body.write_u16::<BigEndian>(iana::SOURCE_TRANSPORT_PORT).unwrap();
        template_body.write_u16::<BigEndian>(2).unwrap();

        buf.write_u16::<BigEndian>(0).unwrap(); // set_id = template
        buf.write_u16::<BigEndian>((4 + template_body.len()) as u16).unwrap();
        buf.extend_from_slice(&template_body);

        // data flowset: set_id = 256, one record: 192.168.1.1, port 54321
        let mut data_body = Vec::new();
        data_body.extend_from_slice(&Ipv4Addr::new(192, 168, 1, 1).octets());
        data_body.write_u16::<BigEndian>(54321).unwrap();

        buf.write_u16::<BigEndian>(256).unwrap();
        buf.write_u16::<BigEndian>((4 + data_body.len()) as u16).unwrap();
        buf.extend_from_slice(&data_body);

        buf
    }

    #[test]
    fn template_then_data_decodes_named_fields() {
        let datagram = push_template_and_data();
        let mut cache = TemplateCache::new();
        let records = decode_v9(&datagram, exporter(), 2055, &mut cache).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].get("sourceIPv4Address"),
            Some(&FlowFieldValue::Ipv4(Ipv4Addr::new(192, 168, 1, 1)))
        );
        assert_eq!(
            records[0].get("sourceTransportPort"),
            Some(&FlowFieldValue::U64(54321))
        );
    }

    #[test]
    fn data_flowset_before_template_is_dropped_not_fatal() {
        let mut buf = Vec::new();
        buf.write_u16::<BigEndian>(9).unwrap();
        buf.write_u16::<BigEndian>(1).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u32::<BigEndian>(1).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u16::<BigEndian>(999).unwrap(); // unknown template id
        buf.write_u16::<BigEndian>(8).unwrap();
        buf.extend_from_slice(&[0u8; 4]);

        let mut cache = TemplateCache::new();
        let records = decode_v9(&buf, exporter(), 2055, &mut cache).unwrap();
        assert!(records.is_empty());
    }
}
