//! Environment-driven configuration, parsed once at startup.

use std::net::SocketAddr;

use crate::error::{Result, ServerError};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub elasticsearch_host: String,
    pub elasticsearch_port_api: u16,
    pub elasticsearch_scheme: String,
    pub syslog_udp_port: u16,
    pub netflow_udp_port: u16,
    pub correlation_cycle_seconds: u64,
    pub metrics_listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://siem.db".to_string(),
            elasticsearch_host: "127.0.0.1".to_string(),
            elasticsearch_port_api: 9200,
            elasticsearch_scheme: "http".to_string(),
            syslog_udp_port: 514,
            netflow_udp_port: 2055,
            correlation_cycle_seconds: 60,
            metrics_listen_addr: "0.0.0.0:9090".parse().unwrap(),
        }
    }
}

impl Config {
    /// Reads the deployment environment variables; anything unset falls
    /// back to the defaults above. `ENCRYPTION_KEY`/`JWT_SECRET_KEY` belong
    /// to the credential store and are never read or logged here.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let elasticsearch_port_api = match std::env::var("ELASTICSEARCH_PORT_API") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ServerError::Config(format!("ELASTICSEARCH_PORT_API is not a valid port: {raw}")))?,
            Err(_) => defaults.elasticsearch_port_api,
        };
        let syslog_udp_port = match std::env::var("SYSLOG_UDP_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ServerError::Config(format!("SYSLOG_UDP_PORT is not a valid port: {raw}")))?,
            Err(_) => defaults.syslog_udp_port,
        };
        let netflow_udp_port = match std::env::var("NETFLOW_UDP_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ServerError::Config(format!("NETFLOW_UDP_PORT is not a valid port: {raw}")))?,
            Err(_) => defaults.netflow_udp_port,
        };
        let correlation_cycle_seconds = match std::env::var("CORRELATION_CYCLE_SECONDS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ServerError::Config(format!("CORRELATION_CYCLE_SECONDS is not a valid integer: {raw}")))?,
            Err(_) => defaults.correlation_cycle_seconds,
        };
        let metrics_listen_addr = match std::env::var("METRICS_LISTEN_ADDR") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ServerError::Config(format!("METRICS_LISTEN_ADDR is not a valid socket address: {raw}")))?,
            Err(_) => defaults.metrics_listen_addr,
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            elasticsearch_host: std::env::var("ELASTICSEARCH_HOST").unwrap_or(defaults.elasticsearch_host),
            elasticsearch_port_api,
            elasticsearch_scheme: std::env::var("ELASTICSEARCH_SCHEME").unwrap_or(defaults.elasticsearch_scheme),
            syslog_udp_port,
            netflow_udp_port,
            correlation_cycle_seconds,
            metrics_listen_addr,
        })
    }
}
