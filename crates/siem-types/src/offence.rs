//! Detection results produced by the correlation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffenceStatus {
    New,
    InProgress,
    ClosedFalsePositive,
    ClosedTruePositive,
    ClosedOther,
}

impl Default for OffenceStatus {
    fn default() -> Self {
        OffenceStatus::New
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offence {
    /// `None` until persisted by the `OffenceRepository`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub severity: Severity,
    #[serde(default)]
    pub status: OffenceStatus,

    pub correlation_rule_id: i64,

    pub triggering_event_summary: Map<String, Value>,
    #[serde(default)]
    pub matched_ioc_details: Option<Map<String, Value>>,
    #[serde(default)]
    pub attributed_apt_group_ids: Vec<i64>,

    pub detected_at: DateTime<Utc>,

    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub assigned_to_user_id: Option<i64>,
}

impl Offence {
    /// Reads `triggering_event_summary[field]` as a string, for response
    /// template substitution.
    pub fn summary_field(&self, field: &str) -> Option<&str> {
        self.triggering_event_summary.get(field)?.as_str()
    }

    /// Reads `matched_ioc_details[field]` as a string.
    pub fn ioc_field(&self, field: &str) -> Option<&str> {
        self.matched_ioc_details.as_ref()?.get(field)?.as_str()
    }
}
