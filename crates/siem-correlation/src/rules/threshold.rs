use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use siem_store::DocumentClient;
use siem_template::Context;
use siem_types::{CorrelationRule, Offence, OffenceStatus};

use super::{truncated_summary, RuleHandler};
use crate::error::Result;

#[derive(Clone, Copy)]
enum ThresholdKind {
    LoginFailures,
    DataExfiltration,
}

pub struct ThresholdLoginFailuresHandler;
pub struct ThresholdDataExfiltrationHandler;

const COMPOSITE_PAGE_SIZE: usize = 1000;

#[async_trait]
impl RuleHandler for ThresholdLoginFailuresHandler {
    async fn evaluate(&self, rule: &CorrelationRule, store: &dyn DocumentClient) -> Result<Vec<Offence>> {
        evaluate_threshold(rule, store, ThresholdKind::LoginFailures).await
    }
}

#[async_trait]
impl RuleHandler for ThresholdDataExfiltrationHandler {
    async fn evaluate(&self, rule: &CorrelationRule, store: &dyn DocumentClient) -> Result<Vec<Offence>> {
        evaluate_threshold(rule, store, ThresholdKind::DataExfiltration).await
    }
}

/// Shared composite-aggregation walk for both threshold rule types; they
/// differ only in base filter, target index, and how "actual" is derived
/// from a bucket (doc count vs. summed bytes).
async fn evaluate_threshold(rule: &CorrelationRule, store: &dyn DocumentClient, kind: ThresholdKind) -> Result<Vec<Offence>> {
    let (Some(threshold), Some(window_minutes)) = (rule.threshold_count, rule.threshold_time_window_minutes) else {
        return Ok(Vec::new());
    };
    if rule.aggregation_fields.is_empty() {
        return Ok(Vec::new());
    }

    let since = Utc::now() - Duration::minutes(window_minutes);
    let time_filter = json!({
        "bool": {
            "should": [
                { "range": { "@timestamp": { "gte": since.to_rfc3339() } } },
                { "range": { "timestamp": { "gte": since.to_rfc3339() } } },
            ],
            "minimum_should_match": 1,
        }
    });
    let base_filters: Vec<Value> = match kind {
        ThresholdKind::LoginFailures => vec![
            json!({ "term": { "event_category": "authentication" } }),
            json!({ "term": { "event_outcome": "failure" } }),
        ],
        ThresholdKind::DataExfiltration => Vec::new(),
    };
    let index_pattern = match kind {
        ThresholdKind::LoginFailures => "siem-syslog-events-*",
        ThresholdKind::DataExfiltration => "siem-netflow-events-*",
    };

    let mut filters = base_filters;
    filters.push(time_filter);
    let sum_field = match kind {
        ThresholdKind::LoginFailures => None,
        ThresholdKind::DataExfiltration => Some("network_bytes_total"),
    };
    let buckets = collect_composite_buckets(
        store,
        index_pattern,
        &filters,
        &rule.aggregation_fields,
        sum_field,
        COMPOSITE_PAGE_SIZE,
    )
    .await?;

    let mut offences = Vec::new();
    for bucket in &buckets {
        let doc_count = bucket.get("doc_count").and_then(Value::as_i64).unwrap_or(0);
        let actual = match kind {
            ThresholdKind::LoginFailures => doc_count,
            ThresholdKind::DataExfiltration => bucket.pointer("/bytes_sum/value").and_then(Value::as_f64).unwrap_or(0.0) as i64,
        };
        if actual < threshold {
            continue;
        }

        let key = bucket.get("key").and_then(Value::as_object).cloned().unwrap_or_default();
        let key_info = key.iter().map(|(k, v)| format!("{k}='{}'", value_to_plain(v))).collect::<Vec<_>>().join(", ");

        let mut ctx = Context::new();
        ctx.set("aggregation_key_info", key_info);
        ctx.set("actual_count", actual.to_string());
        ctx.set("actual_sum_bytes", actual.to_string());
        ctx.set("time_window_minutes", window_minutes.to_string());
        let title = siem_template::render(&rule.generated_offence_title_template, &ctx);

        let mut summary = Map::new();
        for (k, v) in &key {
            summary.insert(k.clone(), v.clone());
        }
        summary.insert("doc_count".to_string(), json!(doc_count));
        if matches!(kind, ThresholdKind::DataExfiltration) {
            summary.insert("bytes_sum".to_string(), json!(actual));
        }

        offences.push(Offence {
            id: None,
            title,
            description: None,
            severity: rule.generated_offence_severity,
            status: OffenceStatus::New,
            correlation_rule_id: rule.id,
            triggering_event_summary: truncated_summary(&summary),
            matched_ioc_details: None,
            attributed_apt_group_ids: Vec::new(),
            detected_at: Utc::now(),
            notes: None,
            assigned_to_user_id: None,
        });
    }
    Ok(offences)
}

/// Walks a composite aggregation page by page, resuming each request from
/// the previous response's `after_key` until the store has no buckets left.
/// A response with fewer buckets than `page_size` (or no `after_key`) is
/// the last page.
pub(crate) async fn collect_composite_buckets(
    store: &dyn DocumentClient,
    index_pattern: &str,
    filters: &[Value],
    aggregation_fields: &[String],
    sum_field: Option<&str>,
    page_size: usize,
) -> Result<Vec<Value>> {
    let mut all_buckets = Vec::new();
    let mut after_key: Option<Value> = None;
    loop {
        let sources: Vec<Value> = aggregation_fields
            .iter()
            .map(|field| {
                let mut source = Map::new();
                source.insert(field.clone(), json!({ "terms": { "field": format!("{field}.keyword") } }));
                Value::Object(source)
            })
            .collect();
        let mut composite = json!({ "size": page_size, "sources": sources });
        if let Some(key) = &after_key {
            composite["after"] = key.clone();
        }

        let mut buckets_agg = json!({ "composite": composite });
        if let Some(field) = sum_field {
            buckets_agg["aggs"] = json!({ "bytes_sum": { "sum": { "field": field } } });
        }

        let body = json!({
            "size": 0,
            "query": { "bool": { "filter": filters } },
            "aggs": { "buckets": buckets_agg },
        });
        let response = store.search(index_pattern, body).await?;
        let buckets = response.pointer("/aggregations/buckets/buckets").and_then(Value::as_array).cloned().unwrap_or_default();
        if buckets.is_empty() {
            break;
        }
        let page_len = buckets.len();
        all_buckets.extend(buckets);

        after_key = response.pointer("/aggregations/buckets/after_key").cloned();
        if page_len < page_size || after_key.is_none() {
            break;
        }
    }
    Ok(all_buckets)
}

fn value_to_plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
