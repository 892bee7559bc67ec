//! Response actions and pipelines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseActionType {
    BlockIp,
    UnblockIp,
    SendEmail,
    CreateTicket,
    IsolateHost,
}

impl ResponseActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseActionType::BlockIp => "block_ip",
            ResponseActionType::UnblockIp => "unblock_ip",
            ResponseActionType::SendEmail => "send_email",
            ResponseActionType::CreateTicket => "create_ticket",
            ResponseActionType::IsolateHost => "isolate_host",
        }
    }
}

impl std::fmt::Display for ResponseActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAction {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub action_type: ResponseActionType,
    pub is_enabled: bool,
    #[serde(default)]
    pub default_params: Map<String, Value>,
}

/// One ordered step of a [`ResponsePipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub action_id: i64,
    pub order: i32,
    #[serde(default)]
    pub action_params_template: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePipeline {
    pub id: i64,
    pub name: String,
    pub is_enabled: bool,
    #[serde(default)]
    pub trigger_correlation_rule_id: Option<i64>,
    pub actions_config: Vec<PipelineStep>,
}

impl ResponsePipeline {
    /// Steps sorted by `order` ascending, the sequence the orchestrator
    /// executes them in.
    pub fn ordered_steps(&self) -> Vec<&PipelineStep> {
        let mut steps: Vec<&PipelineStep> = self.actions_config.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }
}
