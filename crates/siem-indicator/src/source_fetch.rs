//! Feed ingestion: turns a fetched threat-intelligence feed document into
//! stored IoCs, attributed to the APT groups the feed names.
//!
//! The feed transport (HTTP pull, file drop, MISP export) lives with the
//! out-of-process fetcher; this service takes the already-retrieved
//! document, so it can be driven identically from a scheduler, an API
//! call, or a test.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Map;
use thiserror::Error;
use tracing::{info, instrument, warn};

use siem_store::{AptGroupRepository, IocSourceRepository, StoreError};
use siem_types::{IocSourceType, IocType};

use crate::service::{IndicatorService, NewIoc};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("IoC source {0} not found or disabled")]
    SourceUnavailable(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("feed document is not valid JSON: {0}")]
    MalformedFeed(#[from] serde_json::Error),
}

/// One indicator inside a feed entry. Feeds are sloppy about type casing
/// (`IPV4_ADDR`, `ipv4-addr`), so the type is kept raw here and normalized
/// during ingestion.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedIoc {
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    #[serde(default = "default_confidence")]
    pub confidence: u8,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_is_active() -> bool {
    true
}

fn default_confidence() -> u8 {
    50
}

/// One APT group's block of indicators in a feed document.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedEntry {
    pub name: String,
    #[serde(default)]
    pub iocs: Vec<FeedIoc>,
}

pub fn parse_feed(raw: &str) -> Result<Vec<FeedEntry>, FetchError> {
    Ok(serde_json::from_str(raw)?)
}

/// Feed type strings arrive in any casing with `_` or `-` separators.
fn parse_feed_ioc_type(raw: &str) -> Option<IocType> {
    match raw.to_ascii_lowercase().replace('_', "-").as_str() {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchSummary {
    pub added: usize,
    pub failed: usize,
}

/// Ingests feed documents for a registered [`IocSource`]: every indicator
/// becomes a stored IoC carrying the source's name, the fetch time as
/// first/last seen, and the attribution of the APT group whose feed entry
/// it came from.
pub struct SourceFetchService {
    sources: Arc<dyn IocSourceRepository>,
    apts: Arc<dyn AptGroupRepository>,
    indicators: Arc<IndicatorService>,
}

impl SourceFetchService {
    pub fn new(
        sources: Arc<dyn IocSourceRepository>,
        apts: Arc<dyn AptGroupRepository>,
        indicators: Arc<IndicatorService>,
    ) -> Self {
        Self { sources, apts, indicators }
    }

    /// Stores every indicator of `feed` on behalf of source `source_id`.
    /// A single bad indicator is counted and skipped, never fatal to the
    /// rest of the feed. `last_fetched` is stamped whether or not any
    /// indicator survived.
    #[instrument(skip(self, feed))]
    pub async fn fetch_and_store(&self, source_id: i64, feed: &[FeedEntry]) -> Result<FetchSummary, FetchError> {
        let source = self
            .sources
            .get(source_id)
            .await?
            .filter(|s| s.is_enabled)
            .ok_or(FetchError::SourceUnavailable(source_id))?;

        let now = Utc::now();
        if source.source_type == IocSourceType::Internal {
            info!(source = %source.name, "internal source, nothing to auto-fetch");
            self.sources.touch_last_fetched(source_id, now).await?;
            return Ok(FetchSummary::default());
        }

        let apt_ids_by_name: BTreeMap<String, i64> =
            self.apts.list().await?.into_iter().map(|g| (g.name, g.id)).collect();

        let mut summary = FetchSummary::default();
        for entry in feed {
            let attributed: BTreeSet<i64> = apt_ids_by_name.get(&entry.name).copied().into_iter().collect();
            if attributed.is_empty() {
                warn!(apt = %entry.name, "feed names an APT group this deployment does not track, storing unattributed");
            }

            for feed_ioc in &entry.iocs {
                let Some(ioc_type) = parse_feed_ioc_type(&feed_ioc.ioc_type) else {
                    warn!(value = %feed_ioc.value, raw_type = %feed_ioc.ioc_type, "skipping indicator with unrecognized type");
                    summary.failed += 1;
                    continue;
                };

                let mut additional_fields = Map::new();
                if let Some(description) = &feed_ioc.description {
                    additional_fields.insert("description".to_string(), description.clone().into());
                }

                let new_ioc = NewIoc {
                    value: feed_ioc.value.clone(),
                    ioc_type,
                    confidence: feed_ioc.confidence,
                    is_active: feed_ioc.is_active,
                    first_seen: Some(now),
                    last_seen: Some(now),
                    source_name: Some(source.name.clone()),
                    tags: feed_ioc.tags.iter().cloned().collect(),
                    attributed_apt_group_ids: attributed.clone(),
                    additional_fields,
                };
                match self.indicators.add(new_ioc).await {
                    Ok(_) => summary.added += 1,
                    Err(err) => {
                        warn!(value = %feed_ioc.value, error = %err, "failed to store feed indicator");
                        summary.failed += 1;
                    }
                }
            }
        }

        self.sources.touch_last_fetched(source_id, now).await?;
        info!(source = %source.name, added = summary.added, failed = summary.failed, "feed ingested");
        Ok(summary)
    }
}
