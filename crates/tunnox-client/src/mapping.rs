//! Mapping manager (spec.md §4.8): reconciles the desired mapping set
//! pushed via `ConfigSet` against the set of locally running listeners,
//! starting, restarting or stopping handlers as needed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use tunnox_proto::{MappingConfig, MappingProtocol};

use crate::control::ControlClient;
use crate::error::ClientError;
use crate::pool::TunnelPool;
use crate::quota::QuotaChecker;
use crate::tunnel;

const UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_UDP_PACKET_SIZE: usize = 65535;

struct RunningMapping {
    config: MappingConfig,
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl RunningMapping {
    fn stop(self) {
        self.stop.notify_waiters();
        self.task.abort();
    }
}

/// Owns every locally listening mapping handler and reconciles it against
/// each `ConfigSet` update.
pub struct MappingManager {
    control: Arc<ControlClient>,
    pool: Option<Arc<TunnelPool>>,
    quota: Arc<dyn QuotaChecker>,
    running: Mutex<HashMap<String, RunningMapping>>,
}

impl MappingManager {
    pub fn new(control: Arc<ControlClient>, pool: Option<Arc<TunnelPool>>, quota: Arc<dyn QuotaChecker>) -> Arc<Self> {
        Arc::new(Self {
            control,
            pool,
            quota,
            running: Mutex::new(HashMap::new()),
        })
    }

    /// Consume `ConfigSet` updates off the channel for the life of the
    /// client. Returns once the channel closes (the control client dropped
    /// its sender).
    pub async fn run(self: Arc<Self>, mut config_set_rx: mpsc::UnboundedReceiver<Vec<MappingConfig>>) {
        while let Some(mappings) = config_set_rx.recv().await {
            self.reconcile(mappings).await;
        }
    }

    async fn reconcile(self: &Arc<Self>, desired: Vec<MappingConfig>) {
        let desired: HashMap<String, MappingConfig> = desired
            .into_iter()
            .filter(MappingConfig::is_listener_side)
            .map(|m| (m.mapping_id.clone(), m))
            .collect();

        let mut running = self.running.lock().await;

        let stale: Vec<String> = running
            .keys()
            .filter(|id| !desired.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(r) = running.remove(&id) {
                info!(mapping_id = %id, "stopping removed mapping");
                if let Some(pool) = &self.pool {
                    pool.forget_mapping(&id).await;
                }
                r.stop();
            }
        }

        for (id, cfg) in desired {
            let needs_restart = match running.get(&id) {
                Some(existing) => !existing.config.structurally_equal(&cfg),
                None => true,
            };
            if !needs_restart {
                continue;
            }
            if let Some(old) = running.remove(&id) {
                info!(mapping_id = %id, "restarting changed mapping");
                old.stop();
            }
            match self.start(cfg.clone()).await {
                Ok(handle) => {
                    running.insert(id, handle);
                }
                Err(e) => {
                    warn!(mapping_id = %id, "failed to start mapping: {e}");
                }
            }
        }
    }

    async fn start(self: &Arc<Self>, cfg: MappingConfig) -> Result<RunningMapping, ClientError> {
        let stop = Arc::new(Notify::new());
        let stop_signal = stop.clone();
        let control = self.control.clone();
        let cfg2 = cfg.clone();

        let task = match cfg.protocol {
            MappingProtocol::Udp => {
                let socket = UdpSocket::bind(("0.0.0.0", cfg.local_port))
                    .await
                    .map_err(|_| ClientError::PortConflict(cfg.local_port))?;
                tokio::spawn(async move { udp_loop(socket, cfg2, control, stop_signal).await })
            }
            MappingProtocol::Socks5 | MappingProtocol::Socks => {
                let listener = TcpListener::bind(("0.0.0.0", cfg.local_port))
                    .await
                    .map_err(|_| ClientError::PortConflict(cfg.local_port))?;
                tokio::spawn(async move {
                    crate::socks5::accept_loop(listener, cfg2, control, stop_signal).await
                })
            }
            MappingProtocol::Tcp => {
                let listener = TcpListener::bind(("0.0.0.0", cfg.local_port))
                    .await
                    .map_err(|_| ClientError::PortConflict(cfg.local_port))?;
                if let Some(pool) = &self.pool {
                    pool.ensure_mapping(&cfg2).await;
                }
                let pool = self.pool.clone();
                let quota = self.quota.clone();
                tokio::spawn(async move { accept_loop(listener, cfg2, control, pool, quota, stop_signal).await })
            }
        };

        Ok(RunningMapping {
            config: cfg,
            stop,
            task,
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    cfg: MappingConfig,
    control: Arc<ControlClient>,
    pool: Option<Arc<TunnelPool>>,
    quota: Arc<dyn QuotaChecker>,
    stop: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = stop.notified() => return,
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("mapping accept failed: {e}");
                        continue;
                    }
                };
                let control = control.clone();
                let pool = pool.clone();
                let quota = quota.clone();
                let cfg = cfg.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, peer, &cfg, &control, pool.as_ref(), &quota).await {
                        warn!(mapping_id = %cfg.mapping_id, %peer, "mapping connection failed: {e}");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    cfg: &MappingConfig,
    control: &Arc<ControlClient>,
    pool: Option<&Arc<TunnelPool>>,
    quota: &Arc<dyn QuotaChecker>,
) -> Result<(), ClientError> {
    quota.check_mapping_quota(&cfg.mapping_id);
    let tunnel = match pool {
        Some(pool) => pool.take(cfg).await?,
        None => {
            let tunnel_id = Uuid::new_v4().to_string();
            control
                .dial_tunnel(&cfg.mapping_id, &tunnel_id, &cfg.secret_key, None)
                .await?
        }
    };
    info!(mapping_id = %cfg.mapping_id, %peer, "forwarding mapping connection");
    let stats = tunnel::bidirectional_copy(socket, tunnel.into_inner()).await;
    if let Some(pool) = pool {
        pool.release_active(&cfg.mapping_id).await;
    }
    if let Some(e) = stats.send_error.or(stats.receive_error) {
        warn!(mapping_id = %cfg.mapping_id, %peer, "mapping forward ended with error: {e}");
    }
    Ok(())
}

async fn udp_loop(socket: UdpSocket, cfg: MappingConfig, control: Arc<ControlClient>, stop: Arc<Notify>) {
    let socket = Arc::new(socket);
    let mut flows: HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>> = HashMap::new();
    let mut buf = vec![0u8; MAX_UDP_PACKET_SIZE];

    loop {
        tokio::select! {
            _ = stop.notified() => return,
            received = socket.recv_from(&mut buf) => {
                let (n, peer) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("udp mapping recv failed: {e}");
                        continue;
                    }
                };
                let datagram = buf[..n].to_vec();
                if let Some(tx) = flows.get(&peer) {
                    if tx.send(datagram.clone()).is_ok() {
                        continue;
                    }
                    flows.remove(&peer);
                }
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(datagram);
                flows.insert(peer, tx);
                tokio::spawn(udp_flow(socket.clone(), peer, cfg.clone(), control.clone(), rx));
            }
        }
    }
}

async fn udp_flow(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    cfg: MappingConfig,
    control: Arc<ControlClient>,
    mut inbound: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let tunnel_id = Uuid::new_v4().to_string();
    let tunnel = match control
        .dial_tunnel(&cfg.mapping_id, &tunnel_id, &cfg.secret_key, None)
        .await
    {
        Ok(t) => t,
        Err(e) => {
            warn!(mapping_id = %cfg.mapping_id, %peer, "udp tunnel dial failed: {e}");
            return;
        }
    };
    let mut conn = tunnel.into_inner();

    loop {
        tokio::select! {
            datagram = inbound.recv() => {
                let Some(datagram) = datagram else { return; };
                if tunnel::write_framed_datagram(&mut conn, &datagram).await.is_err() {
                    return;
                }
            }
            frame = tunnel::read_framed_datagram(&mut conn) => {
                match frame {
                    Ok(Some(data)) => {
                        let _ = socket.send_to(&data, peer).await;
                    }
                    _ => return,
                }
            }
            _ = tokio::time::sleep(UDP_IDLE_TIMEOUT) => {
                return;
            }
        }
    }
}
