//! Correlation rule specifications.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ioc::IocType;
use crate::offence::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    IocMatchIp,
    ThresholdLoginFailures,
    ThresholdDataExfiltration,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::IocMatchIp => "IOC_MATCH_IP",
            RuleType::ThresholdLoginFailures => "THRESHOLD_LOGIN_FAILURES",
            RuleType::ThresholdDataExfiltration => "THRESHOLD_DATA_EXFILTRATION",
        }
    }
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub id: i64,
    pub name: String,
    pub rule_type: RuleType,
    pub is_enabled: bool,
    #[serde(default)]
    pub event_source_type: Vec<String>,

    #[serde(default)]
    pub event_field_to_match: Option<String>,
    #[serde(default)]
    pub ioc_type_to_match: Option<IocType>,
    #[serde(default)]
    pub ioc_tags_match: Vec<String>,
    #[serde(default)]
    pub ioc_min_confidence: Option<u8>,

    #[serde(default)]
    pub threshold_count: Option<i64>,
    #[serde(default)]
    pub threshold_time_window_minutes: Option<i64>,
    #[serde(default)]
    pub aggregation_fields: Vec<String>,

    pub generated_offence_title_template: String,
    pub generated_offence_severity: Severity,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleValidationError {
    #[error("IOC_MATCH_IP rules require event_field_to_match")]
    MissingEventFieldToMatch,
    #[error("IOC_MATCH_IP rules require ioc_type_to_match")]
    MissingIocTypeToMatch,
    #[error("threshold rules require threshold_count")]
    MissingThresholdCount,
    #[error("threshold rules require threshold_time_window_minutes")]
    MissingThresholdTimeWindow,
    #[error("threshold rules require a non-empty aggregation_fields")]
    EmptyAggregationFields,
}

/// Validates that a rule carries the fields its `rule_type` requires,
/// called on create/update.
pub fn validate_rule(rule: &CorrelationRule) -> Result<(), RuleValidationError> {
    match rule.rule_type {
        RuleType::IocMatchIp => {
            if rule.event_field_to_match.is_none() {
                return Err(RuleValidationError::MissingEventFieldToMatch);
            }
            if rule.ioc_type_to_match.is_none() {
                return Err(RuleValidationError::MissingIocTypeToMatch);
            }
        }
        RuleType::ThresholdLoginFailures | RuleType::ThresholdDataExfiltration => {
            if rule.threshold_count.is_none() {
                return Err(RuleValidationError::MissingThresholdCount);
            }
            if rule.threshold_time_window_minutes.is_none() {
                return Err(RuleValidationError::MissingThresholdTimeWindow);
            }
            if rule.aggregation_fields.is_empty() {
                return Err(RuleValidationError::EmptyAggregationFields);
            }
        }
    }
    Ok(())
}
