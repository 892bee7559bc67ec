//! UDP datagram listener shared by the syslog and NetFlow ingress paths:
//! bind once, receive in a tight loop, hand each datagram to a pluggable
//! handler, survive handler failures.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::error::{IngestError, Result};
use crate::metrics::IngestMetrics;

/// Receive-buffer floor. Anything smaller silently truncates a jumbo
/// syslog or NetFlow datagram.
pub const MIN_BUFFER_BYTES: usize = 64 * 1024;

/// Caps how many datagrams are being parsed/normalized/written
/// concurrently, so a burst of traffic can't unbound the number of
/// in-flight tasks.
const DEFAULT_MAX_CONCURRENT: usize = 256;

/// A bound UDP socket plus a cooperative stop flag. `start`/`stop` are
/// idempotent: calling `stop` twice, or calling it before `start`, is a
/// no-op rather than an error.
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
    stopped: Arc<AtomicBool>,
    concurrency: Arc<Semaphore>,
    metrics: Option<IngestMetrics>,
}

impl UdpListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| IngestError::Bind { addr, source })?;
        let local_addr = socket.local_addr().unwrap_or(addr);
        info!(addr = %local_addr, "udp listener bound");
        Ok(Self {
            socket: Arc::new(socket),
            addr: local_addr,
            stopped: Arc::new(AtomicBool::new(false)),
            concurrency: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            metrics: None,
        })
    }

    /// Attaches a metrics registry; the listener keeps its worker-pool
    /// occupancy gauge current while running.
    pub fn set_metrics(&mut self, metrics: IngestMetrics) {
        self.metrics = Some(metrics);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs the receive loop until `stop()` is called. `handler` is spawned
    /// per datagram on a worker-pool-bounded task; a panic or error inside
    /// it is logged and does not affect subsequent datagrams.
    #[instrument(skip(self, handler), fields(addr = %self.addr))]
    pub async fn run<F, Fut>(&self, handler: F)
    where
        F: Fn(Vec<u8>, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut buf = vec![0u8; MIN_BUFFER_BYTES];

        while !self.stopped.load(Ordering::Relaxed) {
            let (len, peer) = match self.socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "udp recv_from failed, continuing");
                    continue;
                }
            };
            let datagram = buf[..len].to_vec();

            let permit = match self.concurrency.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("worker pool saturated, processing inline to avoid dropping");
                    if let Some(metrics) = &self.metrics {
                        metrics.set_worker_pool_in_use(DEFAULT_MAX_CONCURRENT);
                    }
                    handler(datagram, peer).await;
                    continue;
                }
            };
            if let Some(metrics) = &self.metrics {
                metrics.set_worker_pool_in_use(DEFAULT_MAX_CONCURRENT - self.concurrency.available_permits());
            }

            let handler = handler.clone();
            let metrics = self.metrics.clone();
            let concurrency = self.concurrency.clone();
            tokio::spawn(async move {
                handler(datagram, peer).await;
                drop(permit);
                if let Some(metrics) = &metrics {
                    metrics.set_worker_pool_in_use(DEFAULT_MAX_CONCURRENT - concurrency.available_permits());
                }
            });
        }
        info!(addr = %self.addr, "udp listener stopped");
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stopped: self.stopped.clone(),
        }
    }
}

/// A cloneable handle that can stop a running [`UdpListener`] from outside
/// its `run` future.
#[derive(Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}
