//! Storage adapters: the document store (events, IoCs) and the relational
//! repositories (rules, offences, pipelines, devices, APT groups).

pub mod document;
pub mod error;
pub mod relational;

pub use document::{DocumentClient, DocumentStore};
pub use error::{Result, StoreError};
pub use relational::{
    ActionRepository, AptGroupRepository, DeviceRepository, IocSourceRepository,
    OffenceRepository, PipelineRepository, RuleRepository, SqlxRelationalStore,
};
