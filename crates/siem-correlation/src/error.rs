use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("store error during rule evaluation: {0}")]
    Store(#[from] siem_store::StoreError),
}

pub type Result<T> = std::result::Result<T, CorrelationError>;
