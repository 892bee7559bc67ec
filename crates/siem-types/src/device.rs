//! Managed router/device records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Reachable,
    Unreachable,
    Error,
    Configuring,
    Unknown,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Unknown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Opaque ciphertext produced by the (out-of-scope) credential store.
    /// Never logged; never decrypted here.
    pub encrypted_password: String,
    pub device_type: String,
    #[serde(default)]
    pub status: DeviceStatus,
    pub is_enabled: bool,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub syslog_configured_by_siem: bool,
    #[serde(default)]
    pub netflow_configured_by_siem: bool,
    #[serde(default)]
    pub last_successful_connection: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status_update: Option<DateTime<Utc>>,
}
