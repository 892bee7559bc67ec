//! Dispatches a created offence through its triggered response pipeline:
//! find the one enabled pipeline for the offence's rule, walk its steps in
//! order, resolve effective parameters (default params, overlaid by the
//! step template, then placeholder-substituted from the offence), and
//! dispatch each action to its collaborator. A step failing never aborts
//! the rest of the pipeline.

use std::sync::Arc;

use serde_json::{Map, Value};
use siem_template::{render, Context};
use thiserror::Error;

use siem_store::{ActionRepository, DeviceRepository, PipelineRepository};
use siem_types::{Device, DeviceStatus, Offence, PipelineStep, ResponseActionType};

use crate::adapters::{AdapterError, ResponseAdapter};
use crate::connector::{ConnectorCommandError, ConnectorConnectionError, DeviceConnector, DEVICE_RPC_DEADLINE};
use crate::error::Result;

/// A single pipeline step's failure, local to [`ResponseOrchestrator`] so it
/// can be logged and swallowed without widening [`crate::error::OrchestratorError`]
/// to every collaborator's error type.
#[derive(Debug, Error)]
enum StepError {
    #[error("store error: {0}")]
    Store(#[from] siem_store::StoreError),
    #[error("connector connection error: {0}")]
    Connection(#[from] ConnectorConnectionError),
    #[error("connector command error: {0}")]
    Command(#[from] ConnectorCommandError),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("action references device {0}, which does not exist or is disabled")]
    DeviceUnavailable(i64),
    #[error("block_ip/unblock_ip step is missing a device_id parameter")]
    MissingDeviceId,
    #[error("could not resolve a target IP address from the offence")]
    NoTargetIp,
    #[error("device {0} RPC did not complete within the 30s deadline")]
    DeviceRpcTimeout(i64),
}

pub struct ResponseOrchestrator {
    pipelines: Arc<dyn PipelineRepository>,
    actions: Arc<dyn ActionRepository>,
    devices: Arc<dyn DeviceRepository>,
    connector: Arc<dyn DeviceConnector>,
    adapter: Arc<dyn ResponseAdapter>,
}

impl ResponseOrchestrator {
    pub fn new(
        pipelines: Arc<dyn PipelineRepository>,
        actions: Arc<dyn ActionRepository>,
        devices: Arc<dyn DeviceRepository>,
        connector: Arc<dyn DeviceConnector>,
        adapter: Arc<dyn ResponseAdapter>,
    ) -> Self {
        Self { pipelines, actions, devices, connector, adapter }
    }

    #[tracing::instrument(skip(self, offence), fields(correlation_rule_id = offence.correlation_rule_id))]
    pub async fn execute_for_offence(&self, offence: &Offence) -> Result<()> {
        let pipeline = match self.pipelines.find_by_trigger_rule(offence.correlation_rule_id).await? {
            Some(pipeline) if pipeline.is_enabled => pipeline,
            _ => return Ok(()),
        };

        for step in pipeline.ordered_steps() {
            if let Err(error) = self.execute_step(offence, step).await {
                tracing::warn!(action_id = step.action_id, error = %error, "response pipeline step failed");
            }
        }

        Ok(())
    }

    async fn execute_step(&self, offence: &Offence, step: &PipelineStep) -> std::result::Result<(), StepError> {
        let action = match self.actions.get(step.action_id).await? {
            Some(action) if action.is_enabled => action,
            _ => return Ok(()),
        };

        let mut params = action.default_params.clone();
        for (key, value) in &step.action_params_template {
            params.insert(key.clone(), value.clone());
        }
        let params = render_params(&params, offence);

        match action.action_type {
            ResponseActionType::BlockIp => self.block_ip(offence, &params).await,
            ResponseActionType::UnblockIp => self.unblock_ip(&params).await,
            ResponseActionType::SendEmail => self.adapter.send_email(&params).await.map_err(StepError::from),
            ResponseActionType::CreateTicket => self.adapter.create_ticket(&params).await.map_err(StepError::from),
            ResponseActionType::IsolateHost => self.adapter.isolate_host(&params).await.map_err(StepError::from),
        }
    }

    async fn block_ip(&self, offence: &Offence, params: &Map<String, Value>) -> std::result::Result<(), StepError> {
        let ip = resolve_target_ip(offence).ok_or(StepError::NoTargetIp)?;
        let list_name = str_param(params, "list_name").unwrap_or("siem_auto_blocked_ips").to_string();
        let comment = str_param(params, "comment").map(|s| s.to_string());
        let firewall_chain = str_param(params, "firewall_chain").unwrap_or("forward").to_string();
        let firewall_action = str_param(params, "firewall_action").unwrap_or("drop").to_string();
        let rule_comment_prefix = str_param(params, "rule_comment_prefix").unwrap_or("siem-auto-block:").to_string();
        let place_rule_at_top = bool_param(params, "place_rule_at_top").unwrap_or(false);

        let device = self.acquire_device(params).await?;
        self.devices.update_status(device.id, DeviceStatus::Configuring).await?;
        let rpc = async {
            let mut session = self.connector.connect(&device).await?;
            let command_result = self
                .connector
                .block_ip(
                    &mut session,
                    &list_name,
                    &ip,
                    comment.as_deref(),
                    &firewall_chain,
                    &firewall_action,
                    &rule_comment_prefix,
                    place_rule_at_top,
                )
                .await;
            self.connector.disconnect(session).await?;
            command_result?;
            Ok(())
        };
        let outcome: std::result::Result<(), StepError> = match tokio::time::timeout(DEVICE_RPC_DEADLINE, rpc).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StepError::DeviceRpcTimeout(device.id)),
        };

        self.record_device_outcome(device.id, &outcome).await?;
        outcome
    }

    async fn unblock_ip(&self, params: &Map<String, Value>) -> std::result::Result<(), StepError> {
        let ip = str_param(params, "ip_address")
            .map(|s| s.to_string())
            .ok_or(StepError::NoTargetIp)?;
        let list_name = str_param(params, "list_name").unwrap_or("siem_auto_blocked_ips").to_string();

        let device = self.acquire_device(params).await?;
        self.devices.update_status(device.id, DeviceStatus::Configuring).await?;
        let rpc = async {
            let mut session = self.connector.connect(&device).await?;
            let command_result = self.connector.unblock_ip(&mut session, &list_name, &ip).await;
            self.connector.disconnect(session).await?;
            command_result?;
            Ok(())
        };
        let outcome: std::result::Result<(), StepError> = match tokio::time::timeout(DEVICE_RPC_DEADLINE, rpc).await {
            Ok(outcome) => outcome,
            Err(_) => Err(StepError::DeviceRpcTimeout(device.id)),
        };

        self.record_device_outcome(device.id, &outcome).await?;
        outcome
    }

    async fn acquire_device(&self, params: &Map<String, Value>) -> std::result::Result<Device, StepError> {
        let device_id = int_param(params, "device_id").ok_or(StepError::MissingDeviceId)?;
        self.devices
            .get(device_id)
            .await?
            .filter(|d| d.is_enabled)
            .ok_or(StepError::DeviceUnavailable(device_id))
    }

    async fn record_device_outcome(
        &self,
        device_id: i64,
        outcome: &std::result::Result<(), StepError>,
    ) -> std::result::Result<(), StepError> {
        let status = match outcome {
            Ok(()) => DeviceStatus::Reachable,
            Err(StepError::Connection(_) | StepError::DeviceRpcTimeout(_)) => DeviceStatus::Unreachable,
            Err(StepError::Command(_)) => DeviceStatus::Error,
            Err(_) => return Ok(()),
        };
        self.devices.update_status(device_id, status).await?;
        Ok(())
    }
}

/// `block_ip` target precedence: a matched IoC of IP type wins, otherwise
/// the triggering event's source, otherwise its destination.
fn resolve_target_ip(offence: &Offence) -> Option<String> {
    if let Some(ioc) = &offence.matched_ioc_details {
        let is_ip_type = matches!(ioc.get("type").and_then(Value::as_str), Some("ipv4-addr") | Some("ipv6-addr"));
        if is_ip_type {
            if let Some(value) = ioc.get("value").and_then(Value::as_str) {
                return Some(value.to_string());
            }
        }
    }
    offence
        .summary_field("source_ip")
        .or_else(|| offence.summary_field("destination_ip"))
        .map(|s| s.to_string())
}

/// Renders every string-valued parameter against a context whose `offence`
/// root mirrors the whole [`Offence`], so templates can address
/// `{offence.triggering_event_summary.source_ip}`,
/// `{offence.matched_ioc_details.value}`, `{offence.severity}`, and so on.
fn render_params(params: &Map<String, Value>, offence: &Offence) -> Map<String, Value> {
    let mut ctx = Context::new();
    if let Ok(Value::Object(offence_map)) = serde_json::to_value(offence) {
        ctx.set_object("offence", offence_map);
    }

    params
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => Value::String(render(s, &ctx)),
                other => other.clone(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

fn str_param<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key)?.as_str()
}

fn int_param(params: &Map<String, Value>, key: &str) -> Option<i64> {
    params.get(key)?.as_i64()
}

fn bool_param(params: &Map<String, Value>, key: &str) -> Option<bool> {
    params.get(key)?.as_bool()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use siem_types::{
        Device, DeviceStatus, Offence, OffenceStatus, PipelineStep, ResponseAction, ResponseActionType,
        ResponsePipeline, Severity,
    };
    use std::sync::Mutex;

    use crate::router_connector::mock::MockTransport;
    use crate::router_connector::RouterOsConnector;

    use super::*;

    struct FixedPipelineRepository(Option<ResponsePipeline>);

    #[async_trait]
    impl PipelineRepository for FixedPipelineRepository {
        async fn find_by_trigger_rule(&self, _rule_id: i64) -> siem_store::Result<Option<ResponsePipeline>> {
            Ok(self.0.clone())
        }
    }

    struct FixedActionRepository(Vec<ResponseAction>);

    #[async_trait]
    impl ActionRepository for FixedActionRepository {
        async fn get(&self, id: i64) -> siem_store::Result<Option<ResponseAction>> {
            Ok(self.0.iter().find(|a| a.id == id).cloned())
        }
    }

    struct FixedDeviceRepository {
        device: Device,
        statuses: Mutex<Vec<DeviceStatus>>,
    }

    #[async_trait]
    impl DeviceRepository for FixedDeviceRepository {
        async fn get(&self, id: i64) -> siem_store::Result<Option<Device>> {
            if id == self.device.id {
                Ok(Some(self.device.clone()))
            } else {
                Ok(None)
            }
        }

        async fn update_status(&self, _id: i64, status: DeviceStatus) -> siem_store::Result<()> {
            self.statuses.lock().unwrap().push(status);
            Ok(())
        }

        async fn record_connection_success(&self, _id: i64, _os_version: Option<&str>) -> siem_store::Result<()> {
            self.statuses.lock().unwrap().push(DeviceStatus::Reachable);
            Ok(())
        }

        async fn set_syslog_configured(&self, _id: i64, _configured: bool) -> siem_store::Result<()> {
            Ok(())
        }

        async fn set_netflow_configured(&self, _id: i64, _configured: bool) -> siem_store::Result<()> {
            Ok(())
        }
    }

    fn test_device() -> Device {
        Device {
            id: 1,
            name: "edge-router-1".to_string(),
            host: "192.168.88.1".to_string(),
            port: 8729,
            username: "admin".to_string(),
            encrypted_password: "enc".to_string(),
            device_type: "mikrotik".to_string(),
            status: DeviceStatus::Unknown,
            is_enabled: true,
            os_version: None,
            syslog_configured_by_siem: false,
            netflow_configured_by_siem: false,
            last_successful_connection: None,
            last_status_update: None,
        }
    }

    fn ioc_block_offence() -> Offence {
        let mut triggering_event_summary = Map::new();
        triggering_event_summary.insert("destination_ip".to_string(), json!("8.8.8.8"));

        let mut matched_ioc_details = Map::new();
        matched_ioc_details.insert("value".to_string(), json!("8.8.8.8"));
        matched_ioc_details.insert("type".to_string(), json!("ipv4-addr"));

        Offence {
            id: Some(1),
            title: "Out->8.8.8.8".to_string(),
            description: None,
            severity: Severity::High,
            status: OffenceStatus::New,
            correlation_rule_id: 42,
            triggering_event_summary,
            matched_ioc_details: Some(matched_ioc_details),
            attributed_apt_group_ids: vec![7],
            detected_at: Utc::now(),
            notes: None,
            assigned_to_user_id: None,
        }
    }

    #[tokio::test]
    async fn block_on_detect_pipeline_invokes_connector() {
        let mut default_params = Map::new();
        default_params.insert("device_id".to_string(), json!(1));
        default_params.insert("list_name".to_string(), json!("siem_auto_blocked_ips"));

        let action = ResponseAction {
            id: 10,
            name: "block-ip".to_string(),
            action_type: ResponseActionType::BlockIp,
            is_enabled: true,
            default_params,
        };

        let pipeline = ResponsePipeline {
            id: 1,
            name: "block-on-detect".to_string(),
            is_enabled: true,
            trigger_correlation_rule_id: Some(42),
            actions_config: vec![PipelineStep { action_id: 10, order: 0, action_params_template: Map::new() }],
        };

        let transport = MockTransport::new();
        let connector = Arc::new(RouterOsConnector::new(transport.clone()));
        let device_repo = Arc::new(FixedDeviceRepository { device: test_device(), statuses: Mutex::new(Vec::new()) });

        let orchestrator = ResponseOrchestrator::new(
            Arc::new(FixedPipelineRepository(Some(pipeline))),
            Arc::new(FixedActionRepository(vec![action])),
            device_repo.clone(),
            connector,
            Arc::new(crate::adapters::NoopAdapter),
        );

        orchestrator.execute_for_offence(&ioc_block_offence()).await.unwrap();

        assert_eq!(transport.address_list_len(), 1);
        assert_eq!(transport.firewall_filter_len(), 1);
        assert_eq!(transport.firewall_filter_first_position(), Some("*2".to_string()));
        assert!(device_repo.statuses.lock().unwrap().contains(&DeviceStatus::Reachable));
    }

    #[tokio::test]
    async fn missing_pipeline_is_a_no_op() {
        let orchestrator = ResponseOrchestrator::new(
            Arc::new(FixedPipelineRepository(None)),
            Arc::new(FixedActionRepository(Vec::new())),
            Arc::new(FixedDeviceRepository { device: test_device(), statuses: Mutex::new(Vec::new()) }),
            Arc::new(RouterOsConnector::new(MockTransport::new())),
            Arc::new(crate::adapters::NoopAdapter),
        );

        assert!(orchestrator.execute_for_offence(&ioc_block_offence()).await.is_ok());
    }

    #[test]
    fn resolve_target_ip_prefers_ioc_over_event_fields() {
        let offence = ioc_block_offence();
        assert_eq!(resolve_target_ip(&offence), Some("8.8.8.8".to_string()));
    }

    #[test]
    fn resolve_target_ip_falls_back_to_source_then_destination() {
        let mut offence = ioc_block_offence();
        offence.matched_ioc_details = None;
        offence.triggering_event_summary.insert("source_ip".to_string(), json!("10.0.0.5"));
        assert_eq!(resolve_target_ip(&offence), Some("10.0.0.5".to_string()));

        offence.triggering_event_summary.remove("source_ip");
        assert_eq!(resolve_target_ip(&offence), Some("8.8.8.8".to_string()));
    }

    #[test]
    fn render_params_substitutes_offence_fields() {
        let offence = ioc_block_offence();
        let mut params = Map::new();
        params.insert("comment".to_string(), json!("auto-blocked: {offence.matched_ioc_details.value}"));
        let rendered = render_params(&params, &offence);
        assert_eq!(rendered.get("comment").unwrap().as_str().unwrap(), "auto-blocked: 8.8.8.8");
    }
}
