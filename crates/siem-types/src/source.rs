//! Threat-intelligence feed sources that IoCs are fetched from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of upstream a source is, which drives how (and whether) its
/// feed is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IocSourceType {
    Misp,
    Opencti,
    StixFeed,
    CsvUrl,
    /// Manually curated entries; never auto-fetched.
    Internal,
    MockAptReport,
}

impl IocSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IocSourceType::Misp => "misp",
            IocSourceType::Opencti => "opencti",
            IocSourceType::StixFeed => "stix_feed",
            IocSourceType::CsvUrl => "csv_url",
            IocSourceType::Internal => "internal",
            IocSourceType::MockAptReport => "mock_apt_report",
        }
    }
}

impl std::fmt::Display for IocSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IocSource {
    pub id: i64,
    pub name: String,
    pub source_type: IocSourceType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub is_enabled: bool,
    #[serde(default)]
    pub last_fetched: Option<DateTime<Utc>>,
}
