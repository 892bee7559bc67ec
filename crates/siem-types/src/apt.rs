//! Threat actor (APT group) records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptGroup {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sophistication: Option<String>,
    #[serde(default)]
    pub primary_motivation: Option<String>,
    #[serde(default)]
    pub target_sectors: Vec<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub first_observed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_observed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub references: Vec<String>,
}
