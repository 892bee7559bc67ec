//! The `/metrics` and `/healthz` HTTP surface. Plain HTTP: this process
//! sits on a management network behind the API gateway's own edge, not
//! directly on the internet.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::error::{Result, ServerError};
use crate::metrics::ServerMetrics;

pub async fn serve(addr: SocketAddr, metrics: Arc<ServerMetrics>) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::MetricsBind { addr, source })?;
    info!(%addr, "metrics/health server listening");

    axum::serve(listener, app).await.map_err(|err| ServerError::Http(err.to_string()))?;
    Ok(())
}

async fn metrics_handler(axum::extract::State(metrics): axum::extract::State<Arc<ServerMetrics>>) -> impl IntoResponse {
    metrics.gather_text()
}

async fn healthz_handler(axum::extract::State(metrics): axum::extract::State<Arc<ServerMetrics>>) -> impl IntoResponse {
    if metrics.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}
