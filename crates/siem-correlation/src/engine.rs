//! The periodic rule-evaluation cycle plus the offence dashboard read
//! queries.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use siem_response::ResponseOrchestrator;
use siem_store::{AptGroupRepository, DocumentClient, OffenceRepository, RuleRepository};
use siem_types::{Offence, Severity};

use crate::error::Result;
use crate::rules::handler_for;

pub struct CorrelationEngine {
    rules: Arc<dyn RuleRepository>,
    offences: Arc<dyn OffenceRepository>,
    store: Arc<dyn DocumentClient>,
    apts: Arc<dyn AptGroupRepository>,
    responder: Arc<ResponseOrchestrator>,
    running: Arc<AtomicBool>,
    rerun_requested: Arc<AtomicBool>,
}

impl CorrelationEngine {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        offences: Arc<dyn OffenceRepository>,
        store: Arc<dyn DocumentClient>,
        apts: Arc<dyn AptGroupRepository>,
        responder: Arc<ResponseOrchestrator>,
    ) -> Self {
        Self {
            rules,
            offences,
            store,
            apts,
            responder,
            running: Arc::new(AtomicBool::new(false)),
            rerun_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs one evaluation cycle over every enabled rule. If a cycle is
    /// already in flight when this is called (e.g. the scheduler tick fires
    /// again before the previous cycle finished), the call records a rerun
    /// request and returns immediately instead of running two cycles
    /// concurrently against the same store; the in-flight cycle re-runs
    /// once more before releasing the single-flight lock. Returns the
    /// number of offences created across all (coalesced) passes.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<usize> {
        if self.running.swap(true, Ordering::SeqCst) {
            self.rerun_requested.store(true, Ordering::SeqCst);
            tracing::debug!("correlation cycle already in flight, requested rerun");
            return Ok(0);
        }

        let mut total = 0;
        loop {
            self.rerun_requested.store(false, Ordering::SeqCst);
            total += self.evaluate_once().await?;
            if !self.rerun_requested.load(Ordering::SeqCst) {
                break;
            }
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(total)
    }

    async fn evaluate_once(&self) -> Result<usize> {
        let rules = self.rules.list_enabled().await?;
        let mut created = 0;
        for rule in rules {
            let handler = handler_for(rule.rule_type);
            let offences = handler.evaluate(&rule, self.store.as_ref()).await?;
            for offence in offences {
                let stored = self.offences.create(offence).await?;
                created += 1;
                if let Err(err) = self.responder.execute_for_offence(&stored).await {
                    tracing::warn!(error = %err, offence_id = ?stored.id, "response orchestration failed for offence");
                }
            }
        }
        Ok(created)
    }

    pub async fn summary_by_severity(&self, since_days: i64) -> Result<Vec<(Severity, i64)>> {
        let since = Utc::now() - Duration::days(since_days);
        Ok(self.offences.summary_by_severity_since(since).await?)
    }

    pub async fn recent_offences(&self, limit: i64) -> Result<Vec<Offence>> {
        Ok(self.offences.list_recent(limit).await?)
    }

    /// In-process aggregation over `matched_ioc_details.value` across
    /// offences from the last `since_days` days.
    pub async fn top_triggered_iocs(&self, since_days: i64, limit: usize) -> Result<Vec<(String, i64)>> {
        let since = Utc::now() - Duration::days(since_days);
        let offences = self.offences.list_detected_since(since).await?;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for offence in &offences {
            if let Some(value) = offence.ioc_field("value") {
                *counts.entry(value.to_string()).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(String, i64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Operator triage: advances an offence's status, optionally
    /// re-grading severity and attaching notes. Returns `None` when the
    /// offence does not exist.
    pub async fn update_offence_triage(
        &self,
        offence_id: i64,
        status: siem_types::OffenceStatus,
        severity: Option<Severity>,
        notes: Option<String>,
    ) -> Result<Option<Offence>> {
        Ok(self.offences.update_triage(offence_id, status, severity, notes).await?)
    }

    /// Groups offences by `attributed_apt_group_ids`, joining display names
    /// from the APT table.
    pub async fn offences_by_apt(&self, since_days: i64) -> Result<Vec<(String, i64)>> {
        let since = Utc::now() - Duration::days(since_days);
        let offences = self.offences.list_detected_since(since).await?;
        let names: BTreeMap<i64, String> = self.apts.list().await?.into_iter().map(|g| (g.id, g.name)).collect();

        let mut counts: BTreeMap<i64, i64> = BTreeMap::new();
        for offence in &offences {
            for apt_id in &offence.attributed_apt_group_ids {
                *counts.entry(*apt_id).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(String, i64)> = counts
            .into_iter()
            .map(|(id, count)| (names.get(&id).cloned().unwrap_or_else(|| format!("apt-{id}")), count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map, Value};
    use siem_response::{DeviceConnector, NoopAdapter};
    use siem_store::{ActionRepository, DeviceRepository, PipelineRepository, Result as StoreResult};
    use siem_types::{AptGroup, CorrelationRule, Device, DeviceStatus, IocType, ResponseAction, ResponsePipeline, RuleType};

    use super::*;

    #[derive(Default)]
    struct FixedRuleRepository {
        rules: Vec<CorrelationRule>,
    }

    #[async_trait]
    impl RuleRepository for FixedRuleRepository {
        async fn list_enabled(&self) -> StoreResult<Vec<CorrelationRule>> {
            Ok(self.rules.iter().filter(|r| r.is_enabled).cloned().collect())
        }
        async fn get(&self, id: i64) -> StoreResult<Option<CorrelationRule>> {
            Ok(self.rules.iter().find(|r| r.id == id).cloned())
        }
    }

    #[derive(Default)]
    struct FixedOffenceRepository {
        created: Mutex<Vec<Offence>>,
    }

    #[async_trait]
    impl OffenceRepository for FixedOffenceRepository {
        async fn create(&self, mut offence: Offence) -> StoreResult<Offence> {
            let mut created = self.created.lock().unwrap();
            offence.id = Some(created.len() as i64 + 1);
            created.push(offence.clone());
            Ok(offence)
        }
        async fn list_recent(&self, limit: i64) -> StoreResult<Vec<Offence>> {
            let created = self.created.lock().unwrap();
            Ok(created.iter().rev().take(limit as usize).cloned().collect())
        }
        async fn list_detected_since(&self, since: chrono::DateTime<Utc>) -> StoreResult<Vec<Offence>> {
            let created = self.created.lock().unwrap();
            Ok(created.iter().filter(|o| o.detected_at >= since).cloned().collect())
        }
        async fn summary_by_severity_since(&self, since: chrono::DateTime<Utc>) -> StoreResult<Vec<(Severity, i64)>> {
            let created = self.created.lock().unwrap();
            let mut counts: std::collections::HashMap<Severity, i64> = std::collections::HashMap::new();
            for offence in created.iter().filter(|o| o.detected_at >= since) {
                *counts.entry(offence.severity).or_insert(0) += 1;
            }
            Ok(counts.into_iter().collect())
        }
        async fn update_triage(
            &self,
            id: i64,
            status: siem_types::OffenceStatus,
            severity: Option<Severity>,
            notes: Option<String>,
        ) -> StoreResult<Option<Offence>> {
            let mut created = self.created.lock().unwrap();
            let Some(offence) = created.iter_mut().find(|o| o.id == Some(id)) else {
                return Ok(None);
            };
            offence.status = status;
            if let Some(severity) = severity {
                offence.severity = severity;
            }
            if notes.is_some() {
                offence.notes = notes;
            }
            Ok(Some(offence.clone()))
        }
    }

    struct FixedAptGroupRepository {
        groups: Vec<AptGroup>,
    }

    #[async_trait]
    impl AptGroupRepository for FixedAptGroupRepository {
        async fn get(&self, id: i64) -> StoreResult<Option<AptGroup>> {
            Ok(self.groups.iter().find(|g| g.id == id).cloned())
        }
        async fn list(&self) -> StoreResult<Vec<AptGroup>> {
            Ok(self.groups.clone())
        }
    }

    struct EmptyPipelineRepository;
    #[async_trait]
    impl PipelineRepository for EmptyPipelineRepository {
        async fn find_by_trigger_rule(&self, _rule_id: i64) -> StoreResult<Option<ResponsePipeline>> {
            Ok(None)
        }
    }

    struct EmptyActionRepository;
    #[async_trait]
    impl ActionRepository for EmptyActionRepository {
        async fn get(&self, _id: i64) -> StoreResult<Option<ResponseAction>> {
            Ok(None)
        }
    }

    struct EmptyDeviceRepository;
    #[async_trait]
    impl DeviceRepository for EmptyDeviceRepository {
        async fn get(&self, _id: i64) -> StoreResult<Option<Device>> {
            Ok(None)
        }
        async fn update_status(&self, _id: i64, _status: DeviceStatus) -> StoreResult<()> {
            Ok(())
        }
        async fn record_connection_success(&self, _id: i64, _os_version: Option<&str>) -> StoreResult<()> {
            Ok(())
        }
        async fn set_syslog_configured(&self, _id: i64, _configured: bool) -> StoreResult<()> {
            Ok(())
        }
        async fn set_netflow_configured(&self, _id: i64, _configured: bool) -> StoreResult<()> {
            Ok(())
        }
    }

    struct NoopConnector;
    #[async_trait]
    impl DeviceConnector for NoopConnector {
        async fn connect(&self, _device: &Device) -> std::result::Result<siem_response::DeviceSession, siem_response::ConnectorConnectionError> {
            unreachable!("no test exercises a device connector")
        }
        async fn disconnect(&self, _session: siem_response::DeviceSession) -> std::result::Result<(), siem_response::ConnectorConnectionError> {
            unreachable!()
        }
        async fn get_system_identity(
            &self,
            _session: &mut siem_response::DeviceSession,
        ) -> std::result::Result<siem_response::SystemIdentity, siem_response::ConnectorCommandError> {
            unreachable!()
        }
        async fn get_system_resource_info(
            &self,
            _session: &mut siem_response::DeviceSession,
        ) -> std::result::Result<siem_response::SystemResourceInfo, siem_response::ConnectorCommandError> {
            unreachable!()
        }
        async fn configure_syslog(
            &self,
            _session: &mut siem_response::DeviceSession,
            _target_host: &str,
            _target_port: u16,
            _action_name_prefix: &str,
            _topics: &[String],
        ) -> std::result::Result<(), siem_response::ConnectorCommandError> {
            unreachable!()
        }
        async fn configure_netflow(
            &self,
            _session: &mut siem_response::DeviceSession,
            _target_host: &str,
            _target_port: u16,
            _interfaces: &[String],
            _version: u8,
            _active_timeout_secs: u32,
            _inactive_timeout_secs: u32,
        ) -> std::result::Result<(), siem_response::ConnectorCommandError> {
            unreachable!()
        }
        async fn get_firewall_rules(
            &self,
            _session: &mut siem_response::DeviceSession,
            _chain: Option<&str>,
        ) -> std::result::Result<Vec<siem_response::FirewallRule>, siem_response::ConnectorCommandError> {
            unreachable!()
        }
        async fn block_ip(
            &self,
            _session: &mut siem_response::DeviceSession,
            _list_name: &str,
            _ip: &str,
            _comment: Option<&str>,
            _firewall_chain: &str,
            _firewall_action: &str,
            _rule_comment_prefix: &str,
            _place_rule_at_top: bool,
        ) -> std::result::Result<(), siem_response::ConnectorCommandError> {
            unreachable!()
        }
        async fn unblock_ip(
            &self,
            _session: &mut siem_response::DeviceSession,
            _list_name: &str,
            _ip: &str,
        ) -> std::result::Result<(), siem_response::ConnectorCommandError> {
            unreachable!()
        }
    }

    #[derive(Default)]
    struct MockDocumentClient {
        docs: Mutex<Vec<(String, String, Value)>>,
        next_id: Mutex<u64>,
        search_calls: Mutex<u64>,
    }

    impl MockDocumentClient {
        fn seed(&self, index: &str, source: Value) {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            self.docs.lock().unwrap().push((index.to_string(), next_id.to_string(), source));
        }
    }

    #[async_trait]
    impl DocumentClient for MockDocumentClient {
        async fn write_document(&self, document: Value, index_prefix: &str, index_date: chrono::DateTime<Utc>) -> StoreResult<String> {
            let index = format!("{index_prefix}-{}", index_date.format("%Y.%m.%d"));
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let id = next_id.to_string();
            self.docs.lock().unwrap().push((index, id.clone(), document));
            Ok(id)
        }

        async fn search(&self, index_pattern: &str, body: Value) -> StoreResult<Value> {
            *self.search_calls.lock().unwrap() += 1;
            let prefixes: Vec<&str> = index_pattern.split(',').map(|p| p.trim().trim_end_matches('*')).collect();
            let docs = self.docs.lock().unwrap();
            let mut matched: Vec<&(String, String, Value)> =
                docs.iter().filter(|(index, _, _)| prefixes.iter().any(|p| index.starts_with(p))).collect();

            let query = body.get("query").cloned().unwrap_or_else(|| json!({ "match_all": {} }));
            matched.retain(|(_, _, source)| matches_query(&query, source));

            let mut result = Map::new();
            if let Some(composite) = body.pointer("/aggs/buckets/composite") {
                let sum_field = body.pointer("/aggs/buckets/aggs/bytes_sum/sum/field").and_then(Value::as_str);
                result.insert("aggregations".to_string(), json!({ "buckets": compute_composite(composite, sum_field, &matched) }));
            }

            if let Some(sort) = body.get("sort").and_then(Value::as_array) {
                matched.sort_by(|a, b| compare_by_sort(sort, &a.2, &b.2));
            }
            let size = body.get("size").and_then(Value::as_u64).unwrap_or(matched.len() as u64) as usize;
            let page: Vec<Value> = matched
                .iter()
                .take(size)
                .map(|(index, id, source)| json!({ "_index": index, "_id": id, "_source": source }))
                .collect();
            result.insert("hits".to_string(), json!({ "hits": page, "total": { "value": matched.len() } }));
            Ok(Value::Object(result))
        }

        async fn update_by_id(&self, _index: &str, _id: &str, _body: Value) -> StoreResult<()> {
            Ok(())
        }
        async fn update_by_query(&self, _index_pattern: &str, _body: Value) -> StoreResult<u64> {
            Ok(0)
        }
        async fn delete_by_id(&self, _index: &str, _id: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    fn matches_query(query: &Value, source: &Value) -> bool {
        if query.get("match_all").is_some() {
            return true;
        }
        if let Some(term) = query.get("term").and_then(Value::as_object) {
            return term.iter().all(|(field, val)| field_matches(field, &[val.clone()], source));
        }
        if let Some(terms) = query.get("terms").and_then(Value::as_object) {
            return terms.iter().all(|(field, vals)| {
                let options: Vec<Value> = vals.as_array().cloned().unwrap_or_default();
                field_matches(field, &options, source)
            });
        }
        if let Some(exists) = query.get("exists") {
            let field = exists.get("field").and_then(Value::as_str).unwrap_or("");
            return source.get(field.trim_end_matches(".keyword")).is_some();
        }
        if let Some(range) = query.get("range").and_then(Value::as_object) {
            return range.iter().all(|(field, bounds)| {
                let Some(gte) = bounds.get("gte").and_then(Value::as_str) else { return true };
                source.get(field).and_then(Value::as_str).map(|v| v >= gte).unwrap_or(false)
            });
        }
        if let Some(boolq) = query.get("bool") {
            let filter_ok = boolq
                .get("filter")
                .and_then(Value::as_array)
                .map(|filters| filters.iter().all(|f| matches_query(f, source)))
                .unwrap_or(true);
            let should_ok = boolq
                .get("should")
                .and_then(Value::as_array)
                .map(|shoulds| shoulds.iter().any(|s| matches_query(s, source)))
                .unwrap_or(true);
            return filter_ok && should_ok;
        }
        true
    }

    fn field_matches(field: &str, options: &[Value], source: &Value) -> bool {
        let base_field = field.trim_end_matches(".keyword");
        match source.get(base_field) {
            Some(Value::Array(arr)) => arr.iter().any(|v| options.contains(v)),
            Some(other) => options.contains(other),
            None => false,
        }
    }

    fn compare_by_sort(sort: &[Value], a: &Value, b: &Value) -> std::cmp::Ordering {
        for entry in sort {
            if let Some(obj) = entry.as_object() {
                for (field, dir) in obj {
                    let av = a.get(field).and_then(Value::as_str).unwrap_or("");
                    let bv = b.get(field).and_then(Value::as_str).unwrap_or("");
                    let mut ord = av.cmp(bv);
                    if dir.as_str() == Some("desc") {
                        ord = ord.reverse();
                    }
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
        std::cmp::Ordering::Equal
    }

    fn compute_composite(composite: &Value, sum_field: Option<&str>, matched: &[&(String, String, Value)]) -> Value {
        let sources = composite.get("sources").and_then(Value::as_array).cloned().unwrap_or_default();
        let fields: Vec<String> = sources
            .iter()
            .filter_map(|s| s.as_object())
            .filter_map(|o| o.keys().next().cloned())
            .collect();
        let page_size = composite.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;
        let after: Option<Vec<String>> = composite.get("after").and_then(Value::as_object).map(|key| {
            fields
                .iter()
                .map(|f| key.get(f).and_then(Value::as_str).unwrap_or("").to_string())
                .collect()
        });

        let mut buckets: BTreeMap<Vec<String>, (i64, f64)> = BTreeMap::new();
        for (_, _, source) in matched {
            let key: Vec<String> = fields
                .iter()
                .map(|f| source.get(f).and_then(Value::as_str).unwrap_or("").to_string())
                .collect();
            let entry = buckets.entry(key).or_insert((0, 0.0));
            entry.0 += 1;
            if let Some(sum_field) = sum_field {
                entry.1 += source.get(sum_field).and_then(Value::as_f64).unwrap_or(0.0);
            }
        }

        // Key-ordered pagination: drop everything at or before `after`,
        // return one page, and hand back the last key as the cursor.
        let page: Vec<(Vec<String>, (i64, f64))> = buckets
            .into_iter()
            .filter(|(key, _)| after.as_ref().is_none_or(|a| key > a))
            .take(page_size)
            .collect();
        let after_key = page.last().map(|(key_values, _)| {
            let key: Map<String, Value> = fields.iter().cloned().zip(key_values.iter().cloned()).map(|(f, v)| (f, json!(v))).collect();
            Value::Object(key)
        });

        let bucket_values: Vec<Value> = page
            .into_iter()
            .map(|(key_values, (doc_count, sum))| {
                let key: Map<String, Value> = fields.iter().cloned().zip(key_values).map(|(f, v)| (f, json!(v))).collect();
                let mut bucket = Map::new();
                bucket.insert("key".to_string(), Value::Object(key));
                bucket.insert("doc_count".to_string(), json!(doc_count));
                if sum_field.is_some() {
                    bucket.insert("bytes_sum".to_string(), json!({ "value": sum }));
                }
                Value::Object(bucket)
            })
            .collect();
        let mut result = Map::new();
        result.insert("buckets".to_string(), json!(bucket_values));
        if let Some(after_key) = after_key {
            result.insert("after_key".to_string(), after_key);
        }
        Value::Object(result)
    }

    fn engine(rules: Vec<CorrelationRule>, store: Arc<MockDocumentClient>) -> (CorrelationEngine, Arc<FixedOffenceRepository>) {
        let offences = Arc::new(FixedOffenceRepository::default());
        let responder = Arc::new(ResponseOrchestrator::new(
            Arc::new(EmptyPipelineRepository),
            Arc::new(EmptyActionRepository),
            Arc::new(EmptyDeviceRepository),
            Arc::new(NoopConnector),
            Arc::new(NoopAdapter),
        ));
        let apts = Arc::new(FixedAptGroupRepository {
            groups: vec![AptGroup {
                id: 7,
                name: "APT28".to_string(),
                aliases: vec![],
                description: None,
                sophistication: None,
                primary_motivation: None,
                target_sectors: vec![],
                country: None,
                first_observed: None,
                last_observed: None,
                references: vec![],
            }],
        });
        let engine = CorrelationEngine::new(Arc::new(FixedRuleRepository { rules }), offences.clone(), store, apts, responder);
        (engine, offences)
    }

    fn ioc_match_rule() -> CorrelationRule {
        CorrelationRule {
            id: 1,
            name: "ioc-match".to_string(),
            rule_type: RuleType::IocMatchIp,
            is_enabled: true,
            event_source_type: vec![],
            event_field_to_match: Some("destination_ip".to_string()),
            ioc_type_to_match: Some(IocType::Ipv4Addr),
            ioc_tags_match: vec![],
            ioc_min_confidence: None,
            threshold_count: None,
            threshold_time_window_minutes: None,
            aggregation_fields: vec![],
            generated_offence_title_template: "Traffic to known-bad {ioc_value} from {event_source_ip}".to_string(),
            generated_offence_severity: Severity::High,
        }
    }

    #[tokio::test]
    async fn ioc_match_rule_creates_offence_and_invokes_responder() {
        let store = Arc::new(MockDocumentClient::default());
        let now = Utc::now();
        store.seed(
            "siem-iocs-2026.01.01",
            json!({
                "value": "8.8.8.8", "type": "ipv4-addr", "is_active": true, "confidence": 90,
                "tags": [], "attributed_apt_group_ids": [7],
                "created_at_siem": now.to_rfc3339(), "updated_at_siem": now.to_rfc3339(), "@timestamp": now.to_rfc3339(),
                "additional_fields": {},
            }),
        );
        store.seed(
            "siem-netflow-events-2026.01.01",
            json!({
                "timestamp": now.to_rfc3339(), "source_ip": "192.168.1.1", "destination_ip": "8.8.8.8", "hostname": "router-1",
            }),
        );

        let (engine, offences) = engine(vec![ioc_match_rule()], store);
        let created = engine.run_cycle().await.unwrap();
        assert_eq!(created, 1);

        let stored = offences.created.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Traffic to known-bad 8.8.8.8 from 192.168.1.1");
        assert_eq!(stored[0].attributed_apt_group_ids, vec![7]);
    }

    #[tokio::test]
    async fn threshold_login_failures_fires_once_over_count() {
        let store = Arc::new(MockDocumentClient::default());
        let now = Utc::now();
        for _ in 0..5 {
            store.seed(
                "siem-syslog-events-2026.01.01",
                json!({
                    "timestamp": now.to_rfc3339(), "event_category": "authentication", "event_outcome": "failure",
                    "source_ip": "10.0.0.9",
                }),
            );
        }

        let rule = CorrelationRule {
            id: 2,
            name: "brute-force".to_string(),
            rule_type: RuleType::ThresholdLoginFailures,
            is_enabled: true,
            event_source_type: vec![],
            event_field_to_match: None,
            ioc_type_to_match: None,
            ioc_tags_match: vec![],
            ioc_min_confidence: None,
            threshold_count: Some(3),
            threshold_time_window_minutes: Some(10),
            aggregation_fields: vec!["source_ip".to_string()],
            generated_offence_title_template: "{actual_count} failed logins from {aggregation_key_info}".to_string(),
            generated_offence_severity: Severity::Medium,
        };

        let (engine, offences) = engine(vec![rule], store);
        let created = engine.run_cycle().await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(offences.created.lock().unwrap()[0].title, "5 failed logins from source_ip='10.0.0.9'");
    }

    #[tokio::test]
    async fn threshold_exfiltration_sums_bytes_per_bucket() {
        let store = Arc::new(MockDocumentClient::default());
        let now = Utc::now();
        for bytes in [6_000_000, 5_000_000] {
            store.seed(
                "siem-netflow-events-2026.01.01",
                json!({ "timestamp": now.to_rfc3339(), "source_ip": "10.0.0.5", "network_bytes_total": bytes }),
            );
        }

        let rule = CorrelationRule {
            id: 3,
            name: "exfil".to_string(),
            rule_type: RuleType::ThresholdDataExfiltration,
            is_enabled: true,
            event_source_type: vec![],
            event_field_to_match: None,
            ioc_type_to_match: None,
            ioc_tags_match: vec![],
            ioc_min_confidence: None,
            threshold_count: Some(10_000_000),
            threshold_time_window_minutes: Some(60),
            aggregation_fields: vec!["source_ip".to_string()],
            generated_offence_title_template: "{actual_sum_bytes} bytes from {aggregation_key_info}".to_string(),
            generated_offence_severity: Severity::Critical,
        };

        let (engine, offences) = engine(vec![rule], store);
        let created = engine.run_cycle().await.unwrap();
        assert_eq!(created, 1);
        assert_eq!(offences.created.lock().unwrap()[0].title, "11000000 bytes from source_ip='10.0.0.5'");
    }

    #[tokio::test]
    async fn dashboard_queries_summarize_created_offences() {
        let store = Arc::new(MockDocumentClient::default());
        let (engine, offences) = engine(Vec::new(), store);
        offences
            .create(Offence {
                id: None,
                title: "t".to_string(),
                description: None,
                severity: Severity::High,
                status: siem_types::OffenceStatus::New,
                correlation_rule_id: 1,
                triggering_event_summary: Map::new(),
                matched_ioc_details: Some(json!({ "value": "8.8.8.8" }).as_object().unwrap().clone()),
                attributed_apt_group_ids: vec![7],
                detected_at: Utc::now(),
                notes: None,
                assigned_to_user_id: None,
            })
            .await
            .unwrap();

        let severities = engine.summary_by_severity(7).await.unwrap();
        assert_eq!(severities, vec![(Severity::High, 1)]);

        let top_iocs = engine.top_triggered_iocs(7, 10).await.unwrap();
        assert_eq!(top_iocs, vec![("8.8.8.8".to_string(), 1)]);

        let by_apt = engine.offences_by_apt(7).await.unwrap();
        assert_eq!(by_apt, vec![("APT28".to_string(), 1)]);

        let triaged = engine
            .update_offence_triage(1, siem_types::OffenceStatus::ClosedFalsePositive, None, Some("benign scanner".into()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(triaged.status, siem_types::OffenceStatus::ClosedFalsePositive);
        assert_eq!(triaged.notes.as_deref(), Some("benign scanner"));
        assert!(engine
            .update_offence_triage(999, siem_types::OffenceStatus::ClosedOther, None, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn composite_pagination_walks_after_key_across_pages() {
        let store = Arc::new(MockDocumentClient::default());
        let now = Utc::now();
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            store.seed(
                "siem-netflow-events-2026.01.01",
                json!({ "timestamp": now.to_rfc3339(), "source_ip": ip, "network_bytes_total": 1000 }),
            );
        }

        let buckets = crate::rules::threshold::collect_composite_buckets(
            store.as_ref(),
            "siem-netflow-events-*",
            &[],
            &["source_ip".to_string()],
            Some("network_bytes_total"),
            2,
        )
        .await
        .unwrap();

        assert_eq!(buckets.len(), 3);
        // Three buckets at page size two means the walk resumed from the
        // first page's after_key at least once.
        assert!(*store.search_calls.lock().unwrap() >= 2);
    }

    #[tokio::test]
    async fn concurrent_run_cycle_calls_coalesce() {
        let store = Arc::new(MockDocumentClient::default());
        let (engine, _offences) = engine(Vec::new(), store);
        let engine = Arc::new(engine);
        let a = engine.clone();
        let b = engine.clone();
        let (ra, rb) = tokio::join!(a.run_cycle(), b.run_cycle());
        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }
}
