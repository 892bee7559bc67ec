//! The device connector contract: the thin abstraction the response
//! orchestrator and device provisioning paths use to reach a network
//! device, independent of vendor wire protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use siem_types::Device;

/// Upper bound on one device round trip (connect, command, disconnect).
/// Device RPCs may legitimately take tens of seconds; past this they are
/// treated as a transport failure.
pub(crate) const DEVICE_RPC_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConnectorConnectionError {
    #[error("failed to reach device {device_id} at {host}:{port}: {reason}")]
    Unreachable { device_id: i64, host: String, port: u16, reason: String },

    #[error("authentication to device {device_id} failed: {reason}")]
    AuthenticationFailed { device_id: i64, reason: String },
}

#[derive(Debug, Error)]
pub enum ConnectorCommandError {
    #[error("device {device_id} rejected command {command:?}: {reason}")]
    Trap { device_id: i64, command: String, reason: String },

    #[error("device {device_id} returned a malformed reply to {command:?}: {reason}")]
    MalformedReply { device_id: i64, command: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemIdentity {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemResourceInfo {
    pub cpu_load_percent: u8,
    pub free_memory_bytes: u64,
    pub uptime_seconds: u64,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: String,
    pub chain: String,
    pub action: String,
    pub src_address_list: Option<String>,
    pub comment: Option<String>,
}

/// A live connection to a device, acquired via [`DeviceConnector::connect`].
///
/// Callers must pass it to [`DeviceConnector::disconnect`] to release it
/// deterministically.
/// If it is ever dropped without that (a bug, or an early return past the
/// disconnect call) `Drop` logs a warning so the leak is visible instead of
/// silent; the underlying transport is still torn down when its handle is
/// freed, so no socket is leaked, only the clean device-side logout.
pub struct DeviceSession {
    pub device_id: i64,
    pub(crate) link: Box<dyn RouterLink>,
    released: AtomicBool,
}

impl DeviceSession {
    pub(crate) fn new(device_id: i64, link: Box<dyn RouterLink>) -> Self {
        Self { device_id, link, released: AtomicBool::new(false) }
    }

    pub(crate) fn mark_released(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            tracing::warn!(device_id = self.device_id, "device session dropped without explicit disconnect");
        }
    }
}

/// The abstract device contract. Implementations speak whatever wire
/// protocol the device family uses behind [`RouterLink`]; everything above
/// this trait is vendor-neutral.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self, device: &Device) -> Result<DeviceSession, ConnectorConnectionError>;
    async fn disconnect(&self, session: DeviceSession) -> Result<(), ConnectorConnectionError>;

    async fn get_system_identity(&self, session: &mut DeviceSession) -> Result<SystemIdentity, ConnectorCommandError>;
    async fn get_system_resource_info(
        &self,
        session: &mut DeviceSession,
    ) -> Result<SystemResourceInfo, ConnectorCommandError>;

    async fn configure_syslog(
        &self,
        session: &mut DeviceSession,
        target_host: &str,
        target_port: u16,
        action_name_prefix: &str,
        topics: &[String],
    ) -> Result<(), ConnectorCommandError>;

    async fn configure_netflow(
        &self,
        session: &mut DeviceSession,
        target_host: &str,
        target_port: u16,
        interfaces: &[String],
        version: u8,
        active_timeout_secs: u32,
        inactive_timeout_secs: u32,
    ) -> Result<(), ConnectorCommandError>;

    async fn get_firewall_rules(
        &self,
        session: &mut DeviceSession,
        chain: Option<&str>,
    ) -> Result<Vec<FirewallRule>, ConnectorCommandError>;

    async fn block_ip(
        &self,
        session: &mut DeviceSession,
        list_name: &str,
        ip: &str,
        comment: Option<&str>,
        firewall_chain: &str,
        firewall_action: &str,
        rule_comment_prefix: &str,
        place_rule_at_top: bool,
    ) -> Result<(), ConnectorCommandError>;

    async fn unblock_ip(
        &self,
        session: &mut DeviceSession,
        list_name: &str,
        ip: &str,
    ) -> Result<(), ConnectorCommandError>;
}

/// One request/reply round trip against a connected device, in the style of
/// the vendor's native "API" protocol: a command path plus flat key/value
/// arguments, replying with zero or more flat records. Kept abstract here so
/// [`crate::router_connector`] can swap a real transport for an in-memory one
/// in tests without changing connector logic.
#[async_trait]
pub trait RouterLink: Send {
    async fn call(
        &mut self,
        device_id: i64,
        command: &str,
        args: &[(&str, &str)],
    ) -> Result<Vec<std::collections::BTreeMap<String, String>>, ConnectorCommandError>;

    async fn close(&mut self) -> Result<(), ConnectorConnectionError>;
}
