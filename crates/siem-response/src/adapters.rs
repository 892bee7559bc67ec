//! `send_email`, `create_ticket`, and `isolate_host` get a narrow
//! interface so the orchestrator can dispatch to them uniformly; the real
//! email/ticketing/EDR integrations live outside this crate, and no
//! adapter here ships one.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("response adapter action {action} failed: {reason}")]
pub struct AdapterError {
    pub action: String,
    pub reason: String,
}

#[async_trait]
pub trait ResponseAdapter: Send + Sync {
    async fn send_email(&self, params: &Map<String, Value>) -> Result<(), AdapterError>;
    async fn create_ticket(&self, params: &Map<String, Value>) -> Result<(), AdapterError>;
    async fn isolate_host(&self, params: &Map<String, Value>) -> Result<(), AdapterError>;
}

/// Logs each call and succeeds; stands in for the external
/// email/ticketing/EDR integrations.
#[derive(Debug, Default)]
pub struct NoopAdapter;

#[async_trait]
impl ResponseAdapter for NoopAdapter {
    async fn send_email(&self, params: &Map<String, Value>) -> Result<(), AdapterError> {
        tracing::info!(?params, "send_email (no-op adapter)");
        Ok(())
    }

    async fn create_ticket(&self, params: &Map<String, Value>) -> Result<(), AdapterError> {
        tracing::info!(?params, "create_ticket (no-op adapter)");
        Ok(())
    }

    async fn isolate_host(&self, params: &Map<String, Value>) -> Result<(), AdapterError> {
        tracing::info!(?params, "isolate_host (no-op adapter)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_adapter_succeeds_for_every_action() {
        let adapter = NoopAdapter;
        let params = Map::new();
        assert!(adapter.send_email(&params).await.is_ok());
        assert!(adapter.create_ticket(&params).await.is_ok());
        assert!(adapter.isolate_host(&params).await.is_ok());
    }
}
