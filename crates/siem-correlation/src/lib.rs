//! Periodic rule evaluation over the document store: an extensible
//! rule-type registry, offence creation, hand-off to the response
//! orchestrator, and the offence dashboard read queries.

pub mod engine;
pub mod error;
pub mod rules;

pub use engine::CorrelationEngine;
pub use error::{CorrelationError, Result};
pub use rules::{handler_for, IocMatchHandler, RuleHandler, ThresholdDataExfiltrationHandler, ThresholdLoginFailuresHandler};
