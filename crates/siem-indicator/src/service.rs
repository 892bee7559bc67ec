//! CRUD over IoC documents, APT-attribution tag derivation, and the
//! dashboard aggregations.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};

use siem_store::{DocumentClient, Result, StoreError};
use siem_types::ioc::safe_tag;
use siem_types::{Ioc, IocType};

use crate::apt_lookup::AptLookup;

pub const INDEX_PREFIX: &str = "siem-iocs";
const INDEX_PATTERN: &str = "siem-iocs-*";

pub struct IndicatorService {
    store: Arc<dyn DocumentClient>,
    apt_lookup: Arc<dyn AptLookup>,
}

/// Fields for [`IndicatorService::add`]; `tags` seeds any manual tags, with
/// derived `apt:<name>` tags added on top.
#[derive(Debug, Clone)]
pub struct NewIoc {
    pub value: String,
    pub ioc_type: IocType,
    pub confidence: u8,
    pub is_active: bool,
    pub first_seen: Option<chrono::DateTime<Utc>>,
    pub last_seen: Option<chrono::DateTime<Utc>>,
    pub source_name: Option<String>,
    pub tags: BTreeSet<String>,
    pub attributed_apt_group_ids: BTreeSet<i64>,
    pub additional_fields: Map<String, Value>,
}

impl IndicatorService {
    pub fn new(store: Arc<dyn DocumentClient>, apt_lookup: Arc<dyn AptLookup>) -> Self {
        Self { store, apt_lookup }
    }

    #[tracing::instrument(skip(self, new), fields(value = %new.value))]
    pub async fn add(&self, new: NewIoc) -> Result<Ioc> {
        let now = Utc::now();
        let tags = self.derive_tags(&new.attributed_apt_group_ids, &new.tags).await;
        let mut ioc = Ioc {
            ioc_id: None,
            value: new.value,
            ioc_type: new.ioc_type,
            is_active: new.is_active,
            confidence: new.confidence,
            tags,
            first_seen: new.first_seen,
            last_seen: new.last_seen,
            source_name: new.source_name,
            attributed_apt_group_ids: new.attributed_apt_group_ids,
            created_at_siem: now,
            updated_at_siem: now,
            timestamp_field: now,
            additional_fields: new.additional_fields,
        };
        let body = serde_json::to_value(&ioc)?;
        let id = self.store.write_document(body, INDEX_PREFIX, now).await?;
        ioc.ioc_id = Some(id);
        Ok(ioc)
    }

    /// Partial merge into the existing document, then re-derives tags from
    /// the (possibly just-changed) APT attribution.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(&self, id: &str, patch: Map<String, Value>) -> Result<Option<Ioc>> {
        let Some((index, mut ioc)) = self.find_by_id(id).await? else {
            return Ok(None);
        };

        let mut value = serde_json::to_value(&ioc)?;
        if let Value::Object(obj) = &mut value {
            for (key, patch_value) in patch {
                obj.insert(key, patch_value);
            }
        }
        ioc = serde_json::from_value(value)?;
        ioc.tags = self.derive_tags(&ioc.attributed_apt_group_ids, &ioc.tags).await;
        ioc.updated_at_siem = Utc::now();

        self.store.update_by_id(&index, id, json!({ "doc": serde_json::to_value(&ioc)? })).await?;
        Ok(Some(ioc))
    }

    /// Locates the hosting daily index via search-by-id, then deletes.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<bool> {
        match self.find_by_id(id).await? {
            Some((index, _)) => {
                self.store.delete_by_id(&index, id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn find_by_value(&self, value: &str, ioc_type: Option<IocType>) -> Result<Option<Ioc>> {
        let mut filters = vec![json!({ "term": { "value.keyword": value } })];
        if let Some(t) = ioc_type {
            filters.push(json!({ "term": { "type.keyword": t.as_str() } }));
        }
        let body = json!({ "query": { "bool": { "filter": filters } }, "size": 1 });
        let response = self.store.search(INDEX_PATTERN, body).await?;
        match first_hit(&response) {
            Some((_, hit_id, source)) => Ok(Some(source_to_ioc(&hit_id, source)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self, from: u64, size: u64) -> Result<Vec<Ioc>> {
        self.run_listing(paginated_query(None, from, size)).await
    }

    pub async fn list_created_today(&self, from: u64, size: u64) -> Result<Vec<Ioc>> {
        let start_of_day = Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
        let filter = json!({ "range": { "created_at_siem": { "gte": start_of_day.to_rfc3339() } } });
        self.run_listing(paginated_query(Some(filter), from, size)).await
    }

    pub async fn list_by_apt(&self, apt_id: i64, from: u64, size: u64) -> Result<Vec<Ioc>> {
        let filter = json!({ "term": { "attributed_apt_group_ids": apt_id } });
        self.run_listing(paginated_query(Some(filter), from, size)).await
    }

    /// Appends `apt_id` to `attributed_apt_group_ids` if absent (existing
    /// attributions survive a new link) and refreshes `updated_at_siem`.
    #[tracing::instrument(skip(self))]
    pub async fn link_to_apt(&self, id: &str, apt_id: i64) -> Result<bool> {
        let Some((index, mut ioc)) = self.find_by_id(id).await? else {
            return Ok(false);
        };
        ioc.attributed_apt_group_ids.insert(apt_id);
        ioc.tags = self.derive_tags(&ioc.attributed_apt_group_ids, &ioc.tags).await;
        ioc.updated_at_siem = Utc::now();
        self.store.update_by_id(&index, id, json!({ "doc": serde_json::to_value(&ioc)? })).await?;
        Ok(true)
    }

    /// Removes `apt_id` from every matching IoC in `siem-iocs-*`. Fetches
    /// matches then updates each individually rather than issuing a single
    /// scripted `update_by_query`, because recomputing derived tags needs
    /// the [`AptLookup`] collaborator, which a store-side script can't
    /// call out to.
    #[tracing::instrument(skip(self))]
    pub async fn unlink_apt_everywhere(&self, apt_id: i64) -> Result<u64> {
        let body = json!({ "query": { "term": { "attributed_apt_group_ids": apt_id } }, "size": 1000 });
        let response = self.store.search(INDEX_PATTERN, body).await?;

        let mut updated = 0u64;
        for (index, id, source) in hits(&response) {
            let mut ioc = source_to_ioc(&id, source)?;
            ioc.attributed_apt_group_ids.remove(&apt_id);
            ioc.tags = self.derive_tags(&ioc.attributed_apt_group_ids, &ioc.tags).await;
            ioc.updated_at_siem = Utc::now();
            self.store.update_by_id(&index, &id, json!({ "doc": serde_json::to_value(&ioc)? })).await?;
            updated += 1;
        }
        Ok(updated)
    }

    pub async fn summary_by_type(&self) -> Result<Vec<(IocType, u64)>> {
        let body = json!({
            "size": 0,
            "query": { "term": { "is_active": true } },
            "aggs": { "by_type": { "terms": { "field": "type.keyword" } } },
        });
        let response = self.store.search(INDEX_PATTERN, body).await?;
        let buckets = response.pointer("/aggregations/by_type/buckets").and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(buckets
            .into_iter()
            .filter_map(|bucket| {
                let key = bucket.get("key")?.as_str()?;
                let count = bucket.get("doc_count")?.as_u64()?;
                parse_ioc_type(key).map(|t| (t, count))
            })
            .collect())
    }

    pub async fn unique_tags(&self) -> Result<Vec<String>> {
        let body = json!({ "size": 0, "aggs": { "tags": { "terms": { "field": "tags", "size": 1000 } } } });
        let response = self.store.search(INDEX_PATTERN, body).await?;
        Ok(response
            .pointer("/aggregations/tags/buckets")
            .and_then(Value::as_array)
            .map(|buckets| buckets.iter().filter_map(|b| b.get("key")?.as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<(String, Ioc)>> {
        let body = json!({ "query": { "ids": { "values": [id] } }, "size": 1 });
        let response = self.store.search(INDEX_PATTERN, body).await?;
        match first_hit(&response) {
            Some((index, hit_id, source)) => Ok(Some((index, source_to_ioc(&hit_id, source)?))),
            None => Ok(None),
        }
    }

    async fn run_listing(&self, body: Value) -> Result<Vec<Ioc>> {
        let response = self.store.search(INDEX_PATTERN, body).await?;
        hits(&response).into_iter().map(|(_, id, source)| source_to_ioc(&id, source)).collect()
    }

    /// Rebuilds the `apt:<safe-name>` tag set from `attributed_ids`,
    /// preserving whatever non-derived tags are already present.
    async fn derive_tags(&self, attributed_ids: &BTreeSet<i64>, existing_tags: &BTreeSet<String>) -> BTreeSet<String> {
        let mut tags: BTreeSet<String> = existing_tags.iter().filter(|t| !t.starts_with("apt:")).cloned().collect();
        for id in attributed_ids {
            if let Some(name) = self.apt_lookup.name_for(*id).await {
                tags.insert(format!("apt:{}", safe_tag(&name)));
            }
        }
        tags
    }
}

fn paginated_query(filter: Option<Value>, from: u64, size: u64) -> Value {
    json!({
        "query": filter.unwrap_or_else(|| json!({ "match_all": {} })),
        "from": from,
        "size": size,
        "sort": [{ "updated_at_siem": "desc" }, { "created_at_siem": "desc" }],
    })
}

fn hits(response: &Value) -> Vec<(String, String, Value)> {
    response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|hit| {
                    let index = hit.get("_index")?.as_str()?.to_string();
                    let id = hit.get("_id")?.as_str()?.to_string();
                    let source = hit.get("_source")?.clone();
                    Some((index, id, source))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn first_hit(response: &Value) -> Option<(String, String, Value)> {
    hits(response).into_iter().next()
}

fn source_to_ioc(id: &str, source: Value) -> Result<Ioc> {
    let mut ioc: Ioc = serde_json::from_value(source)?;
    ioc.ioc_id = Some(id.to_string());
    Ok(ioc)
}

fn parse_ioc_type(s: &str) -> Option<IocType> {
    match s {
        "ipv4-addr" => Some(IocType::Ipv4Addr),
        "ipv6-addr" => Some(IocType::Ipv6Addr),
        "domain-name" => Some(IocType::DomainName),
        "url" => Some(IocType::Url),
        "file-hash-md5" => Some(IocType::FileHashMd5),
        "file-hash-sha1" => Some(IocType::FileHashSha1),
        "file-hash-sha256" => Some(IocType::FileHashSha256),
        "email-addr" => Some(IocType::EmailAddr),
        _ => None,
    }
}
