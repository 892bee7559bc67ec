//! Error types the response orchestrator surfaces to its caller. Per-step
//! execution failures are logged and swallowed inside the orchestrator
//! itself; only repository-lookup failures that prevent the orchestrator
//! from even starting a pipeline propagate here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("store error while orchestrating response: {0}")]
    Store(#[from] siem_store::StoreError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
