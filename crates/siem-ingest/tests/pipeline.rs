//! End-to-end ingestion flow: a UDP datagram enters a bound listener, runs
//! through parse/normalize, and lands in the right daily index of an
//! in-memory document store, or in the dead-letter index when it can't.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use byteorder::{BigEndian, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde_json::Value;

use siem_ingest::{IngestMetrics, IngestOutcome, IngestionService, UdpListener, DEAD_LETTER_INDEX, NETFLOW_EVENTS_INDEX};
use siem_store::{DocumentClient, Result as StoreResult, StoreError};

/// Captures every written document with the index it was routed to.
#[derive(Default)]
struct RecordingStore {
    docs: Mutex<Vec<(String, Value)>>,
}

impl RecordingStore {
    fn indexed(&self) -> Vec<(String, Value)> {
        self.docs.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.docs.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentClient for RecordingStore {
    async fn write_document(&self, document: Value, index_prefix: &str, index_date: DateTime<Utc>) -> StoreResult<String> {
        let index = format!("{index_prefix}-{}", index_date.format("%Y.%m.%d"));
        let mut docs = self.docs.lock().unwrap();
        docs.push((index, document));
        Ok(docs.len().to_string())
    }

    async fn search(&self, index_pattern: &str, _body: Value) -> StoreResult<Value> {
        Err(StoreError::NotFound(index_pattern.to_string()))
    }

    async fn update_by_id(&self, _index: &str, id: &str, _body: Value) -> StoreResult<()> {
        Err(StoreError::NotFound(id.to_string()))
    }

    async fn update_by_query(&self, _index_pattern: &str, _body: Value) -> StoreResult<u64> {
        Ok(0)
    }

    async fn delete_by_id(&self, _index: &str, id: &str) -> StoreResult<()> {
        Err(StoreError::NotFound(id.to_string()))
    }
}

async fn wait_for_docs(store: &RecordingStore, count: usize) {
    for _ in 0..100 {
        if store.count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {count} documents, saw {} after 2s", store.count());
}

/// Binds a listener on an ephemeral port and pumps datagrams through
/// `handler`, returning the send-side socket and the listener's address.
async fn start_listener<F, Fut>(handler: F) -> (tokio::net::UdpSocket, std::net::SocketAddr)
where
    F: Fn(Vec<u8>, std::net::SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = UdpListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr();
    tokio::spawn(async move { listener.run(handler).await });
    let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    (client, addr)
}

#[tokio::test]
async fn firewall_drop_line_lands_in_daily_syslog_index() {
    let store = Arc::new(RecordingStore::default());
    let metrics = IngestMetrics::new().unwrap();
    let service = Arc::new(IngestionService::new(store.clone(), metrics.clone()));

    let handler_service = service.clone();
    let (client, addr) = start_listener(move |datagram, peer| {
        let service = handler_service.clone();
        async move {
            service.handle_syslog_datagram(datagram, peer).await;
        }
    })
    .await;

    let line = "<78>May 31 10:10:32 MikrotikRouter firewall,info: input: in:ether1 out:(none), src-mac 00:0c:29:11:22:33, proto TCP (SYN), 192.168.1.100:12345->192.168.88.1:80, len 52";
    client.send_to(line.as_bytes(), addr).await.unwrap();
    wait_for_docs(&store, 1).await;

    let (index, doc) = store.indexed().remove(0);
    assert!(index.starts_with("siem-syslog-events-"));
    assert!(index.ends_with(".05.31"));
    assert_eq!(doc["event_category"], "firewall");
    assert_eq!(doc["event_action"], "denied");
    assert_eq!(doc["event_outcome"], "failure");
    assert_eq!(doc["source_ip"], "192.168.1.100");
    assert_eq!(doc["destination_ip"], "192.168.88.1");
    assert_eq!(doc["syslog_facility"], 9);
    assert_eq!(doc["syslog_severity_code"], 6);

    assert_eq!(metrics.events_normalized_total.get(), 1.0);
    assert_eq!(metrics.events_written_total.get(), 1.0);
    assert_eq!(metrics.events_dead_lettered_total.get(), 0.0);
}

#[tokio::test]
async fn unparseable_datagram_is_dead_lettered() {
    let store = Arc::new(RecordingStore::default());
    let metrics = IngestMetrics::new().unwrap();
    let service = Arc::new(IngestionService::new(store.clone(), metrics.clone()));

    let handler_service = service.clone();
    let (client, addr) = start_listener(move |datagram, peer| {
        let service = handler_service.clone();
        async move {
            service.handle_syslog_datagram(datagram, peer).await;
        }
    })
    .await;

    // Control characters match none of the three accepted formats.
    client.send_to(b"\x01\x02\x03", addr).await.unwrap();
    wait_for_docs(&store, 1).await;

    let (index, doc) = store.indexed().remove(0);
    assert!(index.starts_with(DEAD_LETTER_INDEX));
    assert_eq!(doc["event_category"], "error_log");
    assert_eq!(doc["event_type"], "syslog_parsing_failed");

    assert_eq!(metrics.events_dead_lettered_total.get(), 1.0);
    assert_eq!(metrics.events_written_total.get(), 0.0);
}

fn netflow_v5_datagram() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(5).unwrap(); // version
    buf.write_u16::<BigEndian>(1).unwrap(); // count
    buf.write_u32::<BigEndian>(7_200_000).unwrap(); // sys_uptime_ms
    buf.write_u32::<BigEndian>(1_717_000_000).unwrap(); // unix_secs
    buf.write_u32::<BigEndian>(0).unwrap(); // unix_nsecs
    buf.write_u32::<BigEndian>(1).unwrap(); // flow_sequence
    buf.write_u8(0).unwrap(); // engine_type
    buf.write_u8(0).unwrap(); // engine_id
    buf.write_u16::<BigEndian>(0).unwrap(); // sampling

    buf.write_u32::<BigEndian>(u32::from(Ipv4Addr::new(192, 168, 1, 1))).unwrap();
    buf.write_u32::<BigEndian>(u32::from(Ipv4Addr::new(8, 8, 8, 8))).unwrap();
    buf.write_u32::<BigEndian>(0).unwrap(); // next_hop
    buf.write_u16::<BigEndian>(0).unwrap(); // input_if
    buf.write_u16::<BigEndian>(0).unwrap(); // output_if
    buf.write_u32::<BigEndian>(100).unwrap(); // packets
    buf.write_u32::<BigEndian>(15000).unwrap(); // octets
    buf.write_u32::<BigEndian>(7_190_000).unwrap(); // first_switched
    buf.write_u32::<BigEndian>(7_195_000).unwrap(); // last_switched
    buf.write_u16::<BigEndian>(54321).unwrap(); // src_port
    buf.write_u16::<BigEndian>(53).unwrap(); // dst_port
    buf.write_u8(0).unwrap(); // pad1
    buf.write_u8(0).unwrap(); // tcp_flags
    buf.write_u8(17).unwrap(); // protocol
    buf.write_u8(0).unwrap(); // tos
    buf.write_u16::<BigEndian>(0).unwrap(); // src_as
    buf.write_u16::<BigEndian>(0).unwrap(); // dst_as
    buf.write_u8(0).unwrap(); // src_mask
    buf.write_u8(0).unwrap(); // dst_mask
    buf.write_u16::<BigEndian>(0).unwrap(); // pad2
    buf
}

#[tokio::test]
async fn netflow_flow_lands_in_daily_netflow_index_with_absolute_time() {
    let store = Arc::new(RecordingStore::default());
    let service = Arc::new(IngestionService::new(store.clone(), IngestMetrics::new().unwrap()));

    let handler_service = service.clone();
    let (client, addr) = start_listener(move |datagram, peer| {
        let service = handler_service.clone();
        async move {
            service.handle_netflow_datagram(datagram, peer).await;
        }
    })
    .await;

    client.send_to(&netflow_v5_datagram(), addr).await.unwrap();
    wait_for_docs(&store, 1).await;

    let (index, doc) = store.indexed().remove(0);
    // unix_secs 1_717_000_000 minus the 5s uptime delta is 2024-05-29 UTC.
    assert_eq!(index, format!("{NETFLOW_EVENTS_INDEX}-2024.05.29"));
    assert_eq!(doc["event_category"], "network");
    assert_eq!(doc["event_type"], "flow");
    assert_eq!(doc["source_ip"], "192.168.1.1");
    assert_eq!(doc["destination_ip"], "8.8.8.8");
    assert_eq!(doc["network_protocol"], "UDP");
    assert_eq!(doc["network_bytes_total"], 15000);
    assert_eq!(doc["flow_duration_milliseconds"], 5000);

    let timestamp: DateTime<Utc> = doc["timestamp"].as_str().unwrap().parse().unwrap();
    assert_eq!(timestamp.timestamp_millis(), 1_716_999_995_000);
}

#[tokio::test]
async fn truncated_netflow_datagram_is_dead_lettered() {
    let store = Arc::new(RecordingStore::default());
    let service = Arc::new(IngestionService::new(store.clone(), IngestMetrics::new().unwrap()));

    let handler_service = service.clone();
    let (client, addr) = start_listener(move |datagram, peer| {
        let service = handler_service.clone();
        async move {
            service.handle_netflow_datagram(datagram, peer).await;
        }
    })
    .await;

    client.send_to(&[0u8; 10], addr).await.unwrap();
    wait_for_docs(&store, 1).await;

    let (index, doc) = store.indexed().remove(0);
    assert!(index.starts_with(DEAD_LETTER_INDEX));
    assert_eq!(doc["event_type"], "netflow_processing_error");
}

#[tokio::test]
async fn handlers_report_stored_or_failed_outcomes() {
    let store = Arc::new(RecordingStore::default());
    let service = IngestionService::new(store.clone(), IngestMetrics::new().unwrap());
    let peer: std::net::SocketAddr = "192.168.88.1:514".parse().unwrap();

    let stored = service
        .handle_syslog_datagram(b"<13>Mar  1 00:00:00 host app: hello".to_vec(), peer)
        .await;
    assert_eq!(stored, IngestOutcome::Stored);

    let failed = service.handle_syslog_datagram(vec![1, 2, 3], peer).await;
    assert_eq!(failed, IngestOutcome::Failed);

    let truncated = service.handle_netflow_datagram(vec![0u8; 10], peer).await;
    assert_eq!(truncated, IngestOutcome::Failed);
}
