//! UDP syslog/NetFlow ingestion: bind listeners, parse and normalize each
//! datagram into a [`siem_types::CommonEvent`], and write it to the
//! document store, routing anything that fails to parse or normalize to
//! the dead-letter index instead of dropping it.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ UDP datagram│────▶│ UdpListener  │────▶│ Ingestion    │
//! │ (syslog/    │     │ (bind, recv, │     │ Service      │
//! │  NetFlow)   │     │  dispatch)   │     │ (parse,      │
//! └─────────────┘     └──────────────┘     │  normalize,  │
//!                                           │  write)      │
//!                                           └──────┬───────┘
//!                                                   │
//!                            ┌──────────────────────┼─────────────────────┐
//!                            ▼                                            ▼
//!                    siem-syslog-events-*                     siem-dead-letter-queue-*
//!                    siem-netflow-events-*
//! ```

pub mod error;
pub mod health_monitor;
pub mod listener;
pub mod metrics;
pub mod normalize;
pub mod service;

pub use error::{IngestError, NormalizationError, Result};
pub use health_monitor::HealthMonitor;
pub use listener::{StopHandle, UdpListener};
pub use metrics::{HealthStatus, IngestMetrics};
pub use normalize::{normalize_netflow, normalize_syslog};
pub use service::{IngestOutcome, IngestionService, DEAD_LETTER_INDEX, NETFLOW_EVENTS_INDEX, SYSLOG_EVENTS_INDEX};
