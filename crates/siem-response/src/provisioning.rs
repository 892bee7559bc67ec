//! Device provisioning on top of the connector: status polling, pushing
//! syslog/NetFlow export configuration onto managed routers, and reading
//! their firewall state back. Every operation records the resulting device
//! status so the device table mirrors the last thing the network said.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use siem_store::{DeviceRepository, StoreError};
use siem_types::{Device, DeviceStatus};

use crate::connector::{
    ConnectorCommandError, ConnectorConnectionError, DeviceConnector, FirewallRule,
    SystemResourceInfo, DEVICE_RPC_DEADLINE,
};

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("device {0} not found or disabled")]
    DeviceUnavailable(i64),
    #[error(transparent)]
    Connection(#[from] ConnectorConnectionError),
    #[error(transparent)]
    Command(#[from] ConnectorCommandError),
    #[error("device {0} RPC did not complete within the 30s deadline")]
    Timeout(i64),
}

fn status_for(error: &ProvisioningError) -> Option<DeviceStatus> {
    match error {
        ProvisioningError::Connection(_) | ProvisioningError::Timeout(_) => Some(DeviceStatus::Unreachable),
        ProvisioningError::Command(_) => Some(DeviceStatus::Error),
        _ => None,
    }
}

/// Device names go into vendor config object names, which reject most
/// punctuation; every non-alphanumeric becomes an underscore.
fn safe_name(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

pub struct DeviceProvisioningService {
    devices: Arc<dyn DeviceRepository>,
    connector: Arc<dyn DeviceConnector>,
}

impl DeviceProvisioningService {
    pub fn new(devices: Arc<dyn DeviceRepository>, connector: Arc<dyn DeviceConnector>) -> Self {
        Self { devices, connector }
    }

    async fn enabled_device(&self, device_id: i64) -> Result<Device, ProvisioningError> {
        self.devices
            .get(device_id)
            .await?
            .filter(|d| d.is_enabled)
            .ok_or(ProvisioningError::DeviceUnavailable(device_id))
    }

    async fn record_outcome<T>(
        &self,
        device_id: i64,
        os_version: Option<&str>,
        outcome: &Result<T, ProvisioningError>,
    ) -> Result<(), ProvisioningError> {
        match outcome {
            Ok(_) => self.devices.record_connection_success(device_id, os_version).await?,
            Err(error) => {
                if let Some(status) = status_for(error) {
                    self.devices.update_status(device_id, status).await?;
                }
            }
        }
        Ok(())
    }

    /// Polls the device's resource info, refreshing its status, recorded
    /// OS version, and last-successful-connection stamp.
    #[instrument(skip(self))]
    pub async fn refresh_status(&self, device_id: i64) -> Result<SystemResourceInfo, ProvisioningError> {
        let device = self.enabled_device(device_id).await?;
        let rpc = async {
            let mut session = self.connector.connect(&device).await?;
            let result = self.connector.get_system_resource_info(&mut session).await;
            self.connector.disconnect(session).await?;
            Ok(result?)
        };
        let outcome: Result<SystemResourceInfo, ProvisioningError> =
            match tokio::time::timeout(DEVICE_RPC_DEADLINE, rpc).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProvisioningError::Timeout(device_id)),
            };
        let os_version = outcome.as_ref().ok().map(|info| info.version.clone());
        self.record_outcome(device_id, os_version.as_deref(), &outcome).await?;
        if let Err(error) = &outcome {
            warn!(device_id, error = %error, "device status refresh failed");
        }
        outcome
    }

    /// Points the device's syslog export at `target_host:target_port`.
    /// The logging action name embeds the device name so two devices
    /// provisioned with the same prefix never collide.
    #[instrument(skip(self, topics))]
    pub async fn configure_syslog(
        &self,
        device_id: i64,
        target_host: &str,
        target_port: u16,
        action_name_prefix: &str,
        topics: &[String],
    ) -> Result<(), ProvisioningError> {
        let device = self.enabled_device(device_id).await?;
        self.devices.update_status(device_id, DeviceStatus::Configuring).await?;
        let prefix = format!("{action_name_prefix}_{}", safe_name(&device.name));

        let rpc = async {
            let mut session = self.connector.connect(&device).await?;
            let result = self
                .connector
                .configure_syslog(&mut session, target_host, target_port, &prefix, topics)
                .await;
            self.connector.disconnect(session).await?;
            result?;
            Ok(())
        };
        let outcome: Result<(), ProvisioningError> = match tokio::time::timeout(DEVICE_RPC_DEADLINE, rpc).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProvisioningError::Timeout(device_id)),
        };
        if outcome.is_ok() {
            self.devices.set_syslog_configured(device_id, true).await?;
            info!(device_id, target_host, target_port, "syslog export configured");
        }
        self.record_outcome(device_id, None, &outcome).await?;
        outcome
    }

    /// Points the device's flow export at `target_host:target_port`.
    #[instrument(skip(self, interfaces))]
    pub async fn configure_netflow(
        &self,
        device_id: i64,
        target_host: &str,
        target_port: u16,
        interfaces: &[String],
        version: u8,
        active_timeout_secs: u32,
        inactive_timeout_secs: u32,
    ) -> Result<(), ProvisioningError> {
        let device = self.enabled_device(device_id).await?;
        self.devices.update_status(device_id, DeviceStatus::Configuring).await?;

        let rpc = async {
            let mut session = self.connector.connect(&device).await?;
            let result = self
                .connector
                .configure_netflow(
                    &mut session,
                    target_host,
                    target_port,
                    interfaces,
                    version,
                    active_timeout_secs,
                    inactive_timeout_secs,
                )
                .await;
            self.connector.disconnect(session).await?;
            result?;
            Ok(())
        };
        let outcome: Result<(), ProvisioningError> = match tokio::time::timeout(DEVICE_RPC_DEADLINE, rpc).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProvisioningError::Timeout(device_id)),
        };
        if outcome.is_ok() {
            self.devices.set_netflow_configured(device_id, true).await?;
            info!(device_id, target_host, target_port, version, "flow export configured");
        }
        self.record_outcome(device_id, None, &outcome).await?;
        outcome
    }

    /// Reads the device's firewall rules, optionally limited to one chain.
    #[instrument(skip(self))]
    pub async fn firewall_rules(
        &self,
        device_id: i64,
        chain: Option<&str>,
    ) -> Result<Vec<FirewallRule>, ProvisioningError> {
        let device = self.enabled_device(device_id).await?;
        let rpc = async {
            let mut session = self.connector.connect(&device).await?;
            let result = self.connector.get_firewall_rules(&mut session, chain).await;
            self.connector.disconnect(session).await?;
            Ok(result?)
        };
        let outcome: Result<Vec<FirewallRule>, ProvisioningError> =
            match tokio::time::timeout(DEVICE_RPC_DEADLINE, rpc).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProvisioningError::Timeout(device_id)),
            };
        self.record_outcome(device_id, None, &outcome).await?;
        outcome
    }
}
