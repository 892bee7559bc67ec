//! Rule-type handler registry: a new `rule_type` is a new handler, not a
//! new branch threaded through the engine's cycle loop.

mod ioc_match;
pub(crate) mod threshold;

pub use ioc_match::IocMatchHandler;
pub use threshold::{ThresholdDataExfiltrationHandler, ThresholdLoginFailuresHandler};

use async_trait::async_trait;
use siem_store::DocumentClient;
use siem_types::{CorrelationRule, Offence};

use crate::error::Result;

#[async_trait]
pub trait RuleHandler: Send + Sync {
    async fn evaluate(&self, rule: &CorrelationRule, store: &dyn DocumentClient) -> Result<Vec<Offence>>;
}

/// Maps a [`siem_types::RuleType`] to its handler. A `match` over three
/// arms reads fine at this size; growth past a handful of rule types is the
/// trigger to switch to a `HashMap<RuleType, Box<dyn RuleHandler>>`.
pub fn handler_for(rule_type: siem_types::RuleType) -> Box<dyn RuleHandler> {
    match rule_type {
        siem_types::RuleType::IocMatchIp => Box::new(IocMatchHandler),
        siem_types::RuleType::ThresholdLoginFailures => Box::new(ThresholdLoginFailuresHandler),
        siem_types::RuleType::ThresholdDataExfiltration => Box::new(ThresholdDataExfiltrationHandler),
    }
}

/// Truncates every string value in `fields` to 250 chars, the per-field
/// cap on `triggering_event_summary`.
pub(crate) fn truncated_summary(fields: &serde_json::Map<String, serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
    fields
        .iter()
        .map(|(k, v)| {
            let truncated = match v {
                serde_json::Value::String(s) if s.len() > 250 => serde_json::Value::String(s.chars().take(250).collect()),
                other => other.clone(),
            };
            (k.clone(), truncated)
        })
        .collect()
}
