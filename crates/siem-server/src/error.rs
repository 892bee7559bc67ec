use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] siem_store::StoreError),
    #[error(transparent)]
    Ingest(#[from] siem_ingest::IngestError),
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),
    #[error("failed to bind metrics/health listener on {addr}: {source}")]
    MetricsBind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("metrics/health server error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
