//! Indicator of Compromise documents.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The observable type an [`Ioc`] value represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IocType {
    Ipv4Addr,
    Ipv6Addr,
    DomainName,
    Url,
    #[serde(rename = "file-hash-md5")]
    FileHashMd5,
    #[serde(rename = "file-hash-sha1")]
    FileHashSha1,
    #[serde(rename = "file-hash-sha256")]
    FileHashSha256,
    EmailAddr,
}

impl IocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IocType::Ipv4Addr => "ipv4-addr",
            IocType::Ipv6Addr => "ipv6-addr",
            IocType::DomainName => "domain-name",
            IocType::Url => "url",
            IocType::FileHashMd5 => "file-hash-md5",
            IocType::FileHashSha1 => "file-hash-sha1",
            IocType::FileHashSha256 => "file-hash-sha256",
            IocType::EmailAddr => "email-addr",
        }
    }

    pub fn is_ip(&self) -> bool {
        matches!(self, IocType::Ipv4Addr | IocType::Ipv6Addr)
    }
}

impl std::fmt::Display for IocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A threat indicator, as stored in `siem-iocs-YYYY.MM.DD`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ioc {
    /// Store-assigned id. `None` until the document has been written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ioc_id: Option<String>,

    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: IocType,
    pub is_active: bool,
    pub confidence: u8,
    pub tags: BTreeSet<String>,

    #[serde(default, with = "crate::time::utc_datetime_opt", skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::time::utc_datetime_opt", skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,

    pub attributed_apt_group_ids: BTreeSet<i64>,

    #[serde(with = "crate::time::utc_datetime")]
    pub created_at_siem: DateTime<Utc>,
    #[serde(with = "crate::time::utc_datetime")]
    pub updated_at_siem: DateTime<Utc>,

    #[serde(rename = "@timestamp", with = "crate::time::utc_datetime")]
    pub timestamp_field: DateTime<Utc>,

    #[serde(default)]
    pub additional_fields: Map<String, Value>,
}

impl Ioc {
    /// Index-date fallback chain: `timestamp` (there is none on an `Ioc`),
    /// then `@timestamp`, then `created_at_siem`.
    pub fn index_date(&self) -> DateTime<Utc> {
        self.timestamp_field
    }

    /// Renders this IoC as the JSON map used for
    /// `Offence.matched_ioc_details`.
    pub fn to_details_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Rebuilds the derived `apt:<safe-name>` tags for the current
    /// attribution set, preserving any non-derived tags already present.
    /// `apt_names` maps an attributed id to the group's display name.
    pub fn recompute_derived_tags(&mut self, apt_names: impl Fn(i64) -> Option<String>) {
        self.tags.retain(|t| !t.starts_with("apt:"));
        for id in &self.attributed_apt_group_ids {
            if let Some(name) = apt_names(*id) {
                self.tags.insert(format!("apt:{}", safe_tag(&name)));
            }
        }
    }
}

/// Lowercases and replaces every non-alphanumeric run with a single
/// underscore, yielding the `apt:<safe-name>` tag suffix.
pub fn safe_tag(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_tag_replaces_non_alphanumerics() {
        assert_eq!(safe_tag("APT 28"), "apt_28");
        assert_eq!(safe_tag("Fancy-Bear!!"), "fancy_bear");
    }

    #[test]
    fn deserializes_naive_datetimes_as_utc() {
        let ioc: Ioc = serde_json::from_value(serde_json::json!({
            "value": "8.8.8.8",
            "type": "ipv4-addr",
            "is_active": true,
            "confidence": 80,
            "tags": [],
            "attributed_apt_group_ids": [],
            "first_seen": "2026-03-07T12:30:00",
            "created_at_siem": "2026-03-07T12:30:00Z",
            "updated_at_siem": "2026-03-07 12:30:00",
            "@timestamp": "2026-03-07T14:30:00+02:00",
        }))
        .unwrap();
        use chrono::TimeZone;
        let expected = Utc.with_ymd_and_hms(2026, 3, 7, 12, 30, 0).unwrap();
        assert_eq!(ioc.first_seen, Some(expected));
        assert_eq!(ioc.created_at_siem, expected);
        assert_eq!(ioc.updated_at_siem, expected);
        assert_eq!(ioc.timestamp_field, expected);
    }

    #[test]
    fn recompute_derived_tags_is_sorted_and_deduped() {
        let mut ioc = Ioc {
            ioc_id: Some("1".into()),
            value: "8.8.8.8".into(),
            ioc_type: IocType::Ipv4Addr,
            is_active: true,
            confidence: 80,
            tags: BTreeSet::from(["manual:reviewed".to_string()]),
            first_seen: None,
            last_seen: None,
            source_name: None,
            attributed_apt_group_ids: BTreeSet::from([7, 9]),
            created_at_siem: Utc::now(),
            updated_at_siem: Utc::now(),
            timestamp_field: Utc::now(),
            additional_fields: Map::new(),
        };
        ioc.recompute_derived_tags(|id| match id {
            7 => Some("APT28".to_string()),
            9 => Some("Lazarus Group".to_string()),
            _ => None,
        });
        assert_eq!(
            ioc.tags,
            BTreeSet::from([
                "manual:reviewed".to_string(),
                "apt:apt28".to_string(),
                "apt:lazarus_group".to_string(),
            ])
        );
    }
}
