//! Edge SIEM daemon entry point.
//!
//! Binds the syslog/NetFlow UDP listeners, runs the correlation cycle on a
//! fixed interval, and serves `/metrics` and `/healthz`; all three run
//! concurrently until a shutdown signal arrives.

mod config;
mod error;
mod http;
mod metrics;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use siem_correlation::CorrelationEngine;
use siem_ingest::{HealthMonitor, IngestionService, UdpListener};
use siem_response::{NoopAdapter, ResponseOrchestrator, RouterOsConnector, TcpRouterTransport};
use siem_store::{AptGroupRepository, DocumentClient, DocumentStore, OffenceRepository, PipelineRepository, RuleRepository, SqlxRelationalStore};

use config::Config;
use error::{Result, ServerError};
use metrics::ServerMetrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging().map_err(|e| ServerError::Config(e.to_string()))?;
    info!("siem-server: starting");

    match run_daemon().await {
        Ok(()) => {
            info!("siem-server: exiting normally");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "siem-server: exiting with error");
            Err(err.into())
        }
    }
}

fn init_logging() -> std::result::Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| format!("failed to set logger: {e}"))
}

async fn run_daemon() -> Result<()> {
    let config = Config::from_env()?;
    let shutdown = setup_signal_handlers();

    let document_store = Arc::new(DocumentStore::new(
        &config.elasticsearch_scheme,
        &config.elasticsearch_host,
        config.elasticsearch_port_api,
    ));
    let relational = SqlxRelationalStore::connect(&config.database_url).await?;
    info!(database_url = %config.database_url, "connected to relational store");

    let document_client: Arc<dyn DocumentClient> = document_store.clone();
    let rules: Arc<dyn RuleRepository> = Arc::new(relational.clone());
    let offences: Arc<dyn OffenceRepository> = Arc::new(relational.clone());
    let pipelines: Arc<dyn PipelineRepository> = Arc::new(relational.clone());
    let actions = Arc::new(relational.clone());
    let devices = Arc::new(relational.clone());
    let apts: Arc<dyn AptGroupRepository> = Arc::new(relational.clone());

    let connector = Arc::new(RouterOsConnector::new(TcpRouterTransport::new()));
    let adapter = Arc::new(NoopAdapter);
    let responder = Arc::new(ResponseOrchestrator::new(pipelines, actions, devices, connector, adapter));

    let engine = Arc::new(CorrelationEngine::new(rules, offences, document_client.clone(), apts, responder));

    let ingest_metrics = Arc::new(siem_ingest::IngestMetrics::new()?);
    let server_metrics = Arc::new(ServerMetrics::new(ingest_metrics.clone())?);
    let ingestion = Arc::new(IngestionService::new(document_client.clone(), (*ingest_metrics).clone()));
    let health_monitor = Arc::new(tokio::sync::Mutex::new(HealthMonitor::new((*ingest_metrics).clone())));

    let unspecified = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let mut syslog_listener = UdpListener::bind(SocketAddr::new(unspecified, config.syslog_udp_port)).await?;
    let mut netflow_listener = UdpListener::bind(SocketAddr::new(unspecified, config.netflow_udp_port)).await?;
    syslog_listener.set_metrics((*ingest_metrics).clone());
    netflow_listener.set_metrics((*ingest_metrics).clone());
    let syslog_stop = syslog_listener.stop_handle();
    let netflow_stop = netflow_listener.stop_handle();

    let syslog_task = tokio::spawn({
        let ingestion = ingestion.clone();
        let metrics = ingest_metrics.clone();
        let health = health_monitor.clone();
        async move {
            syslog_listener
                .run(move |datagram, peer| {
                    let ingestion = ingestion.clone();
                    let metrics = metrics.clone();
                    let health = health.clone();
                    async move {
                        metrics.record_datagram_received();
                        let outcome = ingestion.handle_syslog_datagram(datagram, peer).await;
                        let mut health = health.lock().await;
                        if outcome.is_failure() {
                            health.record_failure();
                        } else {
                            health.record_success();
                        }
                    }
                })
                .await;
        }
    });
    let netflow_task = tokio::spawn({
        let ingestion = ingestion.clone();
        let metrics = ingest_metrics.clone();
        let health = health_monitor.clone();
        async move {
            netflow_listener
                .run(move |datagram, peer| {
                    let ingestion = ingestion.clone();
                    let metrics = metrics.clone();
                    let health = health.clone();
                    async move {
                        metrics.record_datagram_received();
                        let outcome = ingestion.handle_netflow_datagram(datagram, peer).await;
                        let mut health = health.lock().await;
                        if outcome.is_failure() {
                            health.record_failure();
                        } else {
                            health.record_success();
                        }
                    }
                })
                .await;
        }
    });

    let http_task = tokio::spawn(http::serve(config.metrics_listen_addr, server_metrics.clone()));

    info!(
        syslog_port = config.syslog_udp_port,
        netflow_port = config.netflow_udp_port,
        "siem-server: listeners bound, entering correlation loop"
    );

    let cycle_interval = tokio::time::Duration::from_secs(config.correlation_cycle_seconds);
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("siem-server: received shutdown signal");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(cycle_interval) => {
                server_metrics.correlation_cycles_total.inc();
                let timer = server_metrics.correlation_cycle_duration_seconds.start_timer();
                match engine.run_cycle().await {
                    Ok(created) => {
                        server_metrics.correlation_offences_created_total.inc_by(created as f64);
                        if created > 0 {
                            info!(created, "siem-server: correlation cycle created offences");
                        }
                    }
                    Err(err) => warn!(error = %err, "siem-server: correlation cycle failed"),
                }
                timer.observe_duration();
            }
        }
    }

    syslog_stop.stop();
    netflow_stop.stop();
    syslog_task.abort();
    netflow_task.abort();
    http_task.abort();

    info!("siem-server: graceful shutdown complete");
    Ok(())
}

fn setup_signal_handlers() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("siem-server: received SIGINT/SIGTERM");
            shutdown_clone.store(true, Ordering::Relaxed);
        }
    });
    shutdown
}

