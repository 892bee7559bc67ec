//! Canonical schema shared by every crate in the SIEM core: the normalized
//! event record, Indicator-of-Compromise documents, correlation rules,
//! offences, response actions/pipelines, and managed devices.
//!
//! Nothing in this crate performs I/O; it is pure data plus the small
//! amount of derived-field logic (tag safety, field truncation, step
//! ordering) that every consumer would otherwise have to reimplement.

pub mod apt;
pub mod device;
pub mod event;
pub mod ioc;
pub mod offence;
pub mod response;
pub mod rule;
pub mod source;
pub mod time;

pub use apt::AptGroup;
pub use device::{Device, DeviceStatus};
pub use event::{event_type, CommonEvent, EventCategory, EventOutcome};
pub use ioc::{safe_tag, Ioc, IocType};
pub use offence::{Offence, OffenceStatus, Severity};
pub use response::{PipelineStep, ResponseAction, ResponseActionType, ResponsePipeline};
pub use rule::{validate_rule, CorrelationRule, RuleType, RuleValidationError};
pub use source::{IocSource, IocSourceType};
