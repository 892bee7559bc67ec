use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use siem_store::DocumentClient;
use siem_template::Context;
use siem_types::{CorrelationRule, Ioc, Offence, OffenceStatus};

use super::{truncated_summary, RuleHandler};
use crate::error::Result;

const IOC_INDEX_PATTERN: &str = "siem-iocs-*";
const EVENT_INDEX_PATTERN: &str = "siem-syslog-events-*,siem-netflow-events-*";

pub struct IocMatchHandler;

#[async_trait]
impl RuleHandler for IocMatchHandler {
    async fn evaluate(&self, rule: &CorrelationRule, store: &dyn DocumentClient) -> Result<Vec<Offence>> {
        let (Some(field), Some(ioc_type)) = (rule.event_field_to_match.as_deref(), rule.ioc_type_to_match) else {
            return Ok(Vec::new());
        };

        let iocs_by_value = self.matching_iocs(rule, ioc_type, store).await?;
        if iocs_by_value.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<&String> = iocs_by_value.keys().collect();
        let mut terms_clause = Map::new();
        terms_clause.insert(field.to_string(), json!(values));
        let filters = vec![
            json!({ "exists": { "field": field } }),
            json!({ "terms": Value::Object(terms_clause) }),
            json!({ "range": { "timestamp": { "gte": (Utc::now() - Duration::hours(1)).to_rfc3339() } } }),
        ];
        let body = json!({
            "query": { "bool": { "filter": filters } },
            "sort": [{ "timestamp": "desc" }],
            "size": 10,
        });
        let response = store.search(EVENT_INDEX_PATTERN, body).await?;

        let mut offences = Vec::new();
        for event in hits(&response) {
            let Some(matched_value) = event.get(field).and_then(Value::as_str) else { continue };
            let Some(ioc) = iocs_by_value.get(matched_value) else { continue };

            let mut ctx = Context::new();
            ctx.set("ioc_value", ioc.value.clone());
            ctx.set("ioc_type", ioc.ioc_type.as_str());
            ctx.set(
                "event_source_ip",
                event.get("source_ip").and_then(Value::as_str).unwrap_or_default().to_string(),
            );
            ctx.set(
                "event_destination_ip",
                event.get("destination_ip").and_then(Value::as_str).unwrap_or_default().to_string(),
            );
            ctx.set(
                "event_hostname",
                event.get("hostname").and_then(Value::as_str).unwrap_or_default().to_string(),
            );
            if let Value::Object(event_map) = &event {
                ctx.set_object("event", event_map.clone());
            }

            let title = siem_template::render(&rule.generated_offence_title_template, &ctx);
            let event_map = match event {
                Value::Object(m) => m,
                _ => Map::new(),
            };

            offences.push(Offence {
                id: None,
                title,
                description: None,
                severity: rule.generated_offence_severity,
                status: OffenceStatus::New,
                correlation_rule_id: rule.id,
                triggering_event_summary: truncated_summary(&event_map),
                matched_ioc_details: Some(ioc.to_details_map()),
                attributed_apt_group_ids: ioc.attributed_apt_group_ids.iter().copied().collect(),
                detected_at: Utc::now(),
                notes: None,
                assigned_to_user_id: None,
            });
        }
        Ok(offences)
    }
}

impl IocMatchHandler {
    async fn matching_iocs(
        &self,
        rule: &CorrelationRule,
        ioc_type: siem_types::IocType,
        store: &dyn DocumentClient,
    ) -> Result<BTreeMap<String, Ioc>> {
        let mut filters = vec![
            json!({ "term": { "is_active": true } }),
            json!({ "term": { "type.keyword": ioc_type.as_str() } }),
        ];
        for tag in &rule.ioc_tags_match {
            filters.push(json!({ "term": { "tags": tag } }));
        }
        if let Some(min_confidence) = rule.ioc_min_confidence {
            filters.push(json!({ "range": { "confidence": { "gte": min_confidence } } }));
        }
        let body = json!({ "query": { "bool": { "filter": filters } }, "size": 1000 });
        let response = store.search(IOC_INDEX_PATTERN, body).await?;

        let mut by_value = BTreeMap::new();
        for source in hits(&response) {
            if let Ok(ioc) = serde_json::from_value::<Ioc>(source) {
                by_value.insert(ioc.value.clone(), ioc);
            }
        }
        Ok(by_value)
    }
}

pub(crate) fn hits(response: &Value) -> Vec<Value> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|hit| hit.get("_source").cloned()).collect())
        .unwrap_or_default()
}
