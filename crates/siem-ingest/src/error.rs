//! Error types for the ingestion path.

use thiserror::Error;

/// Errors raised while classifying a parsed syslog line or NetFlow record
/// into a [`siem_types::CommonEvent`]. Never fatal to the listener: the
/// caller routes the failure (plus the raw payload) to the dead-letter
/// index instead of propagating it.
#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("syslog event failed schema normalization: {0}")]
    SyslogNormalizationFailed(String),
    #[error("NetFlow flow failed schema normalization: {0}")]
    NetflowNormalizationFailed(String),
}

/// Errors surfaced by the ingestion service as a whole. A single bad
/// datagram never produces one of these; they mean the service can no
/// longer make progress (store unreachable, listener bind failed, ...).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to bind UDP listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] siem_store::StoreError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
