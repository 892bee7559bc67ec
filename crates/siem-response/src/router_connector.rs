//! Reference device connector for router-family devices that expose a
//! line-oriented command/reply API (the shape MikroTik's RouterOS API and
//! similar vendor APIs share: a command path plus flat key/value args,
//! replying with flat records).
//!
//! Every configuration write follows the same idempotent idiom (look up
//! the existing entry by its key, update it if found, add it if not) so
//! re-running any operation converges on the same device state instead of
//! accumulating duplicates.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;

use siem_types::Device;

use crate::connector::{
    ConnectorCommandError, ConnectorConnectionError, DeviceConnector, DeviceSession, FirewallRule, RouterLink,
    SystemIdentity, SystemResourceInfo,
};

/// Opens a [`RouterLink`] to a device. Kept separate from
/// [`DeviceConnector`] so tests can swap in an in-memory device without
/// touching the connector logic.
#[async_trait]
pub trait RouterTransport: Send + Sync {
    async fn open(&self, device: &Device) -> Result<Box<dyn RouterLink>, ConnectorConnectionError>;
}

/// Reference connector implementation, generic over how it actually reaches
/// the device so the reconciliation logic (idempotent add-or-update) stays
/// identical between production TLS transport and tests.
pub struct RouterOsConnector<T: RouterTransport> {
    transport: T,
}

impl<T: RouterTransport> RouterOsConnector<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl<T: RouterTransport> DeviceConnector for RouterOsConnector<T> {
    async fn connect(&self, device: &Device) -> Result<DeviceSession, ConnectorConnectionError> {
        let link = self.transport.open(device).await?;
        Ok(DeviceSession::new(device.id, link))
    }

    async fn disconnect(&self, mut session: DeviceSession) -> Result<(), ConnectorConnectionError> {
        let result = session.link.close().await;
        session.mark_released();
        result
    }

    async fn get_system_identity(&self, session: &mut DeviceSession) -> Result<SystemIdentity, ConnectorCommandError> {
        let rows = session.link.call(session.device_id, "/system/identity/print", &[]).await?;
        let name = rows
            .first()
            .and_then(|row| row.get("name"))
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        Ok(SystemIdentity { name })
    }

    async fn get_system_resource_info(
        &self,
        session: &mut DeviceSession,
    ) -> Result<SystemResourceInfo, ConnectorCommandError> {
        let rows = session.link.call(session.device_id, "/system/resource/print", &[]).await?;
        let row = rows.first().ok_or_else(|| ConnectorCommandError::MalformedReply {
            device_id: session.device_id,
            command: "/system/resource/print".to_string(),
            reason: "empty reply".to_string(),
        })?;
        Ok(SystemResourceInfo {
            cpu_load_percent: row.get("cpu-load").and_then(|v| v.parse().ok()).unwrap_or(0),
            free_memory_bytes: row.get("free-memory").and_then(|v| v.parse().ok()).unwrap_or(0),
            uptime_seconds: row.get("uptime").and_then(|v| v.parse().ok()).unwrap_or(0),
            version: row.get("version").cloned().unwrap_or_default(),
        })
    }

    async fn configure_syslog(
        &self,
        session: &mut DeviceSession,
        target_host: &str,
        target_port: u16,
        action_name_prefix: &str,
        topics: &[String],
    ) -> Result<(), ConnectorCommandError> {
        let action_name = format!("{action_name_prefix}-remote");
        let target_port = target_port.to_string();

        let existing_actions = session.link.call(session.device_id, "/system/logging/action/print", &[]).await?;
        let action_id = existing_actions
            .iter()
            .find(|row| row.get("name").map(String::as_str) == Some(action_name.as_str()))
            .and_then(|row| row.get(".id").cloned());

        match action_id {
            Some(id) => {
                session
                    .link
                    .call(
                        session.device_id,
                        "/system/logging/action/set",
                        &[(".id", &id), ("remote", target_host), ("remote-port", &target_port)],
                    )
                    .await?;
            }
            None => {
                session
                    .link
                    .call(
                        session.device_id,
                        "/system/logging/action/add",
                        &[("name", &action_name), ("target", "remote"), ("remote", target_host), ("remote-port", &target_port)],
                    )
                    .await?;
            }
        }

        let topics_joined = topics.join(",");
        let existing_rules = session.link.call(session.device_id, "/system/logging/print", &[]).await?;
        let rule_id = existing_rules
            .iter()
            .find(|row| row.get("action").map(String::as_str) == Some(action_name.as_str()))
            .and_then(|row| row.get(".id").cloned());

        match rule_id {
            Some(id) => {
                session
                    .link
                    .call(session.device_id, "/system/logging/set", &[(".id", &id), ("topics", &topics_joined)])
                    .await?;
            }
            None => {
                session
                    .link
                    .call(session.device_id, "/system/logging/add", &[("action", &action_name), ("topics", &topics_joined)])
                    .await?;
            }
        }

        Ok(())
    }

    async fn configure_netflow(
        &self,
        session: &mut DeviceSession,
        target_host: &str,
        target_port: u16,
        interfaces: &[String],
        version: u8,
        active_timeout_secs: u32,
        inactive_timeout_secs: u32,
    ) -> Result<(), ConnectorCommandError> {
        let target_port = target_port.to_string();
        let version = version.to_string();
        let active_timeout_secs = active_timeout_secs.to_string();
        let inactive_timeout_secs = inactive_timeout_secs.to_string();
        let interfaces_joined = interfaces.join(",");

        session
            .link
            .call(
                session.device_id,
                "/ip/traffic-flow/set",
                &[
                    ("enabled", "yes"),
                    ("interfaces", &interfaces_joined),
                    ("active-flow-timeout", &active_timeout_secs),
                    ("inactive-flow-timeout", &inactive_timeout_secs),
                ],
            )
            .await?;

        let existing_targets = session.link.call(session.device_id, "/ip/traffic-flow/target/print", &[]).await?;
        let target_id = existing_targets
            .iter()
            .find(|row| row.get("dst-address").map(String::as_str) == Some(target_host))
            .and_then(|row| row.get(".id").cloned());

        match target_id {
            Some(id) => {
                session
                    .link
                    .call(
                        session.device_id,
                        "/ip/traffic-flow/target/set",
                        &[(".id", &id), ("port", &target_port), ("version", &version)],
                    )
                    .await?;
            }
            None => {
                session
                    .link
                    .call(
                        session.device_id,
                        "/ip/traffic-flow/target/add",
                        &[("dst-address", target_host), ("port", &target_port), ("version", &version)],
                    )
                    .await?;
            }
        }

        Ok(())
    }

    async fn get_firewall_rules(
        &self,
        session: &mut DeviceSession,
        chain: Option<&str>,
    ) -> Result<Vec<FirewallRule>, ConnectorCommandError> {
        let rows = session.link.call(session.device_id, "/ip/firewall/filter/print", &[]).await?;
        Ok(rows
            .into_iter()
            .filter(|row| chain.is_none_or(|c| row.get("chain").map(String::as_str) == Some(c)))
            .map(|row| FirewallRule {
                id: row.get(".id").cloned().unwrap_or_default(),
                chain: row.get("chain").cloned().unwrap_or_default(),
                action: row.get("action").cloned().unwrap_or_default(),
                src_address_list: row.get("src-address-list").cloned(),
                comment: row.get("comment").cloned(),
            })
            .collect())
    }

    async fn block_ip(
        &self,
        session: &mut DeviceSession,
        list_name: &str,
        ip: &str,
        comment: Option<&str>,
        firewall_chain: &str,
        firewall_action: &str,
        rule_comment_prefix: &str,
        place_rule_at_top: bool,
    ) -> Result<(), ConnectorCommandError> {
        let mut add_args = vec![("list", list_name), ("address", ip)];
        if let Some(comment) = comment {
            add_args.push(("comment", comment));
        }
        match session.link.call(session.device_id, "/ip/firewall/address-list/add", &add_args).await {
            Ok(_) => {}
            Err(ConnectorCommandError::Trap { reason, .. })
                if reason.contains("already have such entry") || reason.contains("duplicate entry") => {}
            Err(other) => return Err(other),
        }

        let existing_rules = session.link.call(session.device_id, "/ip/firewall/filter/print", &[]).await?;
        let rule = existing_rules.iter().find(|row| {
            row.get("chain").map(String::as_str) == Some(firewall_chain)
                && row.get("src-address-list").map(String::as_str) == Some(list_name)
        });

        let rule_id = match rule {
            Some(row) => row.get(".id").cloned(),
            None => {
                let comment = format!("{rule_comment_prefix}{list_name}");
                let added = session
                    .link
                    .call(
                        session.device_id,
                        "/ip/firewall/filter/add",
                        &[
                            ("chain", firewall_chain),
                            ("action", firewall_action),
                            ("src-address-list", list_name),
                            ("comment", &comment),
                        ],
                    )
                    .await?;
                added.first().and_then(|row| row.get(".id").cloned())
            }
        };

        if place_rule_at_top {
            if let Some(id) = rule_id {
                session
                    .link
                    .call(session.device_id, "/ip/firewall/filter/move", &[("numbers", &id), ("destination", "0")])
                    .await?;
            }
        }

        Ok(())
    }

    async fn unblock_ip(
        &self,
        session: &mut DeviceSession,
        list_name: &str,
        ip: &str,
    ) -> Result<(), ConnectorCommandError> {
        let entries = session
            .link
            .call(session.device_id, "/ip/firewall/address-list/print", &[("list", list_name), ("address", ip)])
            .await?;

        for entry in &entries {
            if let Some(id) = entry.get(".id") {
                session.link.call(session.device_id, "/ip/firewall/address-list/remove", &[(".id", id)]).await?;
            }
        }

        let remaining = session
            .link
            .call(session.device_id, "/ip/firewall/address-list/print", &[("list", list_name), ("address", ip)])
            .await?;
        if !remaining.is_empty() {
            return Err(ConnectorCommandError::MalformedReply {
                device_id: session.device_id,
                command: "/ip/firewall/address-list/remove".to_string(),
                reason: format!("{ip} still present in {list_name} after removal"),
            });
        }

        let rule_present = session
            .link
            .call(session.device_id, "/ip/firewall/filter/print", &[])
            .await?
            .iter()
            .any(|row| row.get("src-address-list").map(String::as_str) == Some(list_name));
        if !rule_present {
            tracing::warn!(device_id = session.device_id, list_name, "no firewall rule references this address list");
        }

        Ok(())
    }
}

/// Production transport: a TLS-wrapped TCP connection speaking
/// newline-delimited `command\targ=value\targ=value` request lines, replying
/// with newline-delimited `key=value\tkey=value` records terminated by a
/// blank line. Certificate validation is permissive: these devices are
/// reached over a private management network and commonly present
/// self-signed certificates.
pub struct TcpRouterTransport {
    tls: TlsConnector,
}

impl TcpRouterTransport {
    pub fn new() -> Self {
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertVerifier))
            .with_no_client_auth();
        Self { tls: TlsConnector::from(Arc::new(config)) }
    }
}

impl Default for TcpRouterTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RouterTransport for TcpRouterTransport {
    async fn open(&self, device: &Device) -> Result<Box<dyn RouterLink>, ConnectorConnectionError> {
        let addr = format!("{}:{}", device.host, device.port);
        let tcp = TcpStream::connect(&addr).await.map_err(|e| ConnectorConnectionError::Unreachable {
            device_id: device.id,
            host: device.host.clone(),
            port: device.port,
            reason: e.to_string(),
        })?;
        let server_name = ServerName::try_from(device.host.clone()).map_err(|e| ConnectorConnectionError::Unreachable {
            device_id: device.id,
            host: device.host.clone(),
            port: device.port,
            reason: e.to_string(),
        })?;
        let stream = self.tls.connect(server_name, tcp).await.map_err(|e| ConnectorConnectionError::Unreachable {
            device_id: device.id,
            host: device.host.clone(),
            port: device.port,
            reason: e.to_string(),
        })?;
        Ok(Box::new(TcpRouterLink { stream }))
    }
}

struct TcpRouterLink {
    stream: tokio_rustls::client::TlsStream<TcpStream>,
}

#[async_trait]
impl RouterLink for TcpRouterLink {
    async fn call(
        &mut self,
        device_id: i64,
        command: &str,
        args: &[(&str, &str)],
    ) -> Result<Vec<BTreeMap<String, String>>, ConnectorCommandError> {
        let mut line = command.to_string();
        for (key, value) in args {
            line.push('\t');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }
        line.push('\n');

        self.stream.write_all(line.as_bytes()).await.map_err(|e| ConnectorCommandError::Trap {
            device_id,
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        let mut buf = [0u8; 4096];
        let n = self.stream.read(&mut buf).await.map_err(|e| ConnectorCommandError::Trap {
            device_id,
            command: command.to_string(),
            reason: e.to_string(),
        })?;
        let reply = String::from_utf8_lossy(&buf[..n]);

        if let Some(reason) = reply.strip_prefix("!trap\t") {
            return Err(ConnectorCommandError::Trap { device_id, command: command.to_string(), reason: reason.trim().to_string() });
        }

        let mut rows = Vec::new();
        for line in reply.lines().filter(|l| !l.is_empty()) {
            let mut row = BTreeMap::new();
            for field in line.split('\t') {
                if let Some((key, value)) = field.split_once('=') {
                    row.insert(key.to_string(), value.to_string());
                }
            }
            if !row.is_empty() {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    async fn close(&mut self) -> Result<(), ConnectorConnectionError> {
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}

#[derive(Debug)]
struct AcceptAnyCertVerifier;

impl ServerCertVerifier for AcceptAnyCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
pub mod mock {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use siem_types::Device;

    use crate::connector::{ConnectorCommandError, ConnectorConnectionError, RouterLink};

    use super::RouterTransport;

    /// An in-memory device: address-list entries and firewall/logging rows,
    /// keyed the same way the real device's `.id` column would be. Lets the
    /// connector's idempotence properties be exercised without a router.
    #[derive(Default)]
    struct DeviceState {
        next_id: u64,
        address_list: Vec<BTreeMap<String, String>>,
        firewall_filter: Vec<BTreeMap<String, String>>,
        logging_actions: Vec<BTreeMap<String, String>>,
        logging_rules: Vec<BTreeMap<String, String>>,
        traffic_flow_targets: Vec<BTreeMap<String, String>>,
    }

    impl DeviceState {
        fn alloc_id(&mut self) -> String {
            self.next_id += 1;
            format!("*{}", self.next_id)
        }
    }

    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: std::sync::Arc<Mutex<DeviceState>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn address_list_len(&self) -> usize {
            self.state.lock().unwrap().address_list.len()
        }

        pub fn firewall_filter_len(&self) -> usize {
            self.state.lock().unwrap().firewall_filter.len()
        }

        pub fn firewall_filter_first_position(&self) -> Option<String> {
            self.state.lock().unwrap().firewall_filter.first().and_then(|r| r.get(".id").cloned())
        }
    }

    #[async_trait]
    impl RouterTransport for MockTransport {
        async fn open(&self, _device: &Device) -> Result<Box<dyn RouterLink>, ConnectorConnectionError> {
            Ok(Box::new(MockLink { state: self.state.clone() }))
        }
    }

    struct MockLink {
        state: std::sync::Arc<Mutex<DeviceState>>,
    }

    #[async_trait]
    impl RouterLink for MockLink {
        async fn call(
            &mut self,
            device_id: i64,
            command: &str,
            args: &[(&str, &str)],
        ) -> Result<Vec<BTreeMap<String, String>>, ConnectorCommandError> {
            let mut state = self.state.lock().unwrap();
            let args: BTreeMap<String, String> = args.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

            match command {
                "/system/identity/print" => {
                    let mut row = BTreeMap::new();
                    row.insert("name".to_string(), "mock-router".to_string());
                    Ok(vec![row])
                }
                "/system/resource/print" => {
                    let mut row = BTreeMap::new();
                    row.insert("cpu-load".to_string(), "1".to_string());
                    row.insert("free-memory".to_string(), "1000000".to_string());
                    row.insert("uptime".to_string(), "100".to_string());
                    row.insert("version".to_string(), "7.0".to_string());
                    Ok(vec![row])
                }
                "/ip/firewall/address-list/add" => {
                    let addr = args.get("address").cloned().unwrap_or_default();
                    let list = args.get("list").cloned().unwrap_or_default();
                    let duplicate = state
                        .address_list
                        .iter()
                        .any(|row| row.get("address") == Some(&addr) && row.get("list") == Some(&list));
                    if duplicate {
                        return Err(ConnectorCommandError::Trap {
                            device_id,
                            command: command.to_string(),
                            reason: "already have such entry".to_string(),
                        });
                    }
                    let mut row = args.clone();
                    let id = state.alloc_id();
                    row.insert(".id".to_string(), id);
                    state.address_list.push(row);
                    Ok(vec![])
                }
                "/ip/firewall/address-list/print" => Ok(state
                    .address_list
                    .iter()
                    .filter(|row| {
                        args.get("list").is_none_or(|v| row.get("list") == Some(v))
                            && args.get("address").is_none_or(|v| row.get("address") == Some(v))
                    })
                    .cloned()
                    .collect()),
                "/ip/firewall/address-list/remove" => {
                    let id = args.get(".id").cloned().unwrap_or_default();
                    state.address_list.retain(|row| row.get(".id") != Some(&id));
                    Ok(vec![])
                }
                "/ip/firewall/filter/print" => Ok(state
                    .firewall_filter
                    .iter()
                    .filter(|row| args.get("chain").is_none_or(|v| row.get("chain") == Some(v)))
                    .cloned()
                    .collect()),
                "/ip/firewall/filter/add" => {
                    let mut row = args.clone();
                    let id = state.alloc_id();
                    row.insert(".id".to_string(), id.clone());
                    state.firewall_filter.push(row.clone());
                    Ok(vec![row])
                }
                "/ip/firewall/filter/move" => {
                    let id = args.get("numbers").cloned().unwrap_or_default();
                    if let Some(pos) = state.firewall_filter.iter().position(|row| row.get(".id") == Some(&id)) {
                        let row = state.firewall_filter.remove(pos);
                        state.firewall_filter.insert(0, row);
                    }
                    Ok(vec![])
                }
                "/system/logging/action/print" => Ok(state.logging_actions.clone()),
                "/system/logging/action/add" => {
                    let mut row = args.clone();
                    row.insert(".id".to_string(), state.alloc_id());
                    state.logging_actions.push(row);
                    Ok(vec![])
                }
                "/system/logging/action/set" => {
                    let id = args.get(".id").cloned().unwrap_or_default();
                    if let Some(row) = state.logging_actions.iter_mut().find(|row| row.get(".id") == Some(&id)) {
                        row.extend(args.clone());
                    }
                    Ok(vec![])
                }
                "/system/logging/print" => Ok(state.logging_rules.clone()),
                "/system/logging/add" => {
                    let mut row = args.clone();
                    row.insert(".id".to_string(), state.alloc_id());
                    state.logging_rules.push(row);
                    Ok(vec![])
                }
                "/system/logging/set" => {
                    let id = args.get(".id").cloned().unwrap_or_default();
                    if let Some(row) = state.logging_rules.iter_mut().find(|row| row.get(".id") == Some(&id)) {
                        row.extend(args.clone());
                    }
                    Ok(vec![])
                }
                "/ip/traffic-flow/set" => Ok(vec![]),
                "/ip/traffic-flow/target/print" => Ok(state.traffic_flow_targets.clone()),
                "/ip/traffic-flow/target/add" => {
                    let mut row = args.clone();
                    row.insert(".id".to_string(), state.alloc_id());
                    state.traffic_flow_targets.push(row);
                    Ok(vec![])
                }
                "/ip/traffic-flow/target/set" => {
                    let id = args.get(".id").cloned().unwrap_or_default();
                    if let Some(row) = state.traffic_flow_targets.iter_mut().find(|row| row.get(".id") == Some(&id)) {
                        row.extend(args.clone());
                    }
                    Ok(vec![])
                }
                other => Err(ConnectorCommandError::MalformedReply {
                    device_id,
                    command: other.to_string(),
                    reason: "unsupported mock command".to_string(),
                }),
            }
        }

        async fn close(&mut self) -> Result<(), ConnectorConnectionError> {
            Ok(())
        }
    }
}
