//! Response orchestration: dispatches a created offence through its
//! triggered pipeline, executing each step via a device connector or an
//! adapter interface.
//!
//! ```text
//! Offence ──▶ ResponseOrchestrator ──▶ pipeline steps, in order
//!                                        │
//!                 ┌──────────────────────┼───────────────────────┐
//!                 ▼                                               ▼
//!         DeviceConnector (block_ip/unblock_ip)          ResponseAdapter (email/
//!           └─ RouterOsConnector (reference impl)           ticket/isolate_host)
//! ```

pub mod adapters;
pub mod connector;
pub mod error;
pub mod orchestrator;
pub mod provisioning;
pub mod router_connector;

pub use adapters::{AdapterError, NoopAdapter, ResponseAdapter};
pub use connector::{
    ConnectorCommandError, ConnectorConnectionError, DeviceConnector, DeviceSession, FirewallRule, RouterLink,
    SystemIdentity, SystemResourceInfo,
};
pub use error::{OrchestratorError, Result};
pub use orchestrator::ResponseOrchestrator;
pub use provisioning::{DeviceProvisioningService, ProvisioningError};
pub use router_connector::{RouterOsConnector, RouterTransport, TcpRouterTransport};
