//! Control client (spec.md §4.6): owns the control connection, handshake,
//! heartbeat, dispatch loop, auto-reconnect and auto-transport-detection.
//!
//! Two long-lived tasks (read loop, heartbeat loop) are each guarded by an
//! atomic "running" flag so a reconnect cannot spawn a duplicate (spec.md
//! §5). `ConfigSet` and `TunnelOpenRequestCmd` are handed off over
//! unbounded channels rather than called back into directly, keeping the
//! mapping manager and target handler from reaching into this struct's
//! storage (spec.md §9, capability interfaces passed downward).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use tunnox_proto::{
    ClientDefaults, ClientNotification, CommandPacket, CommandResponse, CommandType,
    HandshakeRequest, HandshakeResp, KickClientBody, KickReason, MappingConfig, PacketType,
    TransferPacket, TransportKind, TunnelOpenRequestCmdBody,
};
use tunnox_transport::{Dialer, KcpDialer, TcpDialer, TransportError};
use tunnox_transport_quic::{QuicConfig, QuicDialer};
use tunnox_transport_ws::WsDialer;

use crate::command::CommandResponseManager;
use crate::config::RunConfig;
use crate::error::{ClientError, ClientResult};
use crate::notification::NotificationDispatcher;
use crate::packet_stream::PacketStream;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const AUTO_DETECT_ROUND_TIMEOUTS: [Duration; 2] =
    [Duration::from_secs(15), Duration::from_secs(25)];

/// Which concrete transport backs the control connection right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTransport {
    Standard(TransportKind),
    HttpPoll,
}

/// Terminal condition surfaced to the outer daemon (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    /// Kicked with an unrecognized or generic code: stop reconnecting, but
    /// the process may keep running (e.g. to serve already-open tunnels).
    Kicked,
    AuthFailed,
    CredentialsReset,
    /// Reconnect attempts were exhausted without the client being kicked or
    /// rejected; the caller decides whether to restart the process.
    ReconnectExhausted,
}

#[derive(Deserialize)]
struct ConfigSetBody {
    #[serde(default)]
    mappings: Vec<MappingConfig>,
}

struct Dialers {
    websocket: Arc<dyn Dialer>,
    quic: Arc<dyn Dialer>,
    tcp: Arc<dyn Dialer>,
    kcp: Arc<dyn Dialer>,
}

impl Dialers {
    fn new() -> Self {
        Self {
            websocket: Arc::new(WsDialer::new()),
            quic: Arc::new(QuicDialer::new(QuicConfig::client_insecure())),
            tcp: Arc::new(TcpDialer::new()),
            kcp: Arc::new(KcpDialer::new()),
        }
    }

    fn for_kind(&self, kind: TransportKind) -> Arc<dyn Dialer> {
        match kind {
            TransportKind::WebSocket => self.websocket.clone(),
            TransportKind::Quic => self.quic.clone(),
            TransportKind::Tcp => self.tcp.clone(),
            TransportKind::Kcp => self.kcp.clone(),
        }
    }
}

fn split_endpoint(kind: TransportKind, endpoint: &str) -> (String, u16) {
    if matches!(kind, TransportKind::WebSocket) {
        (endpoint.to_string(), 0)
    } else {
        tunnox_proto::parse_listen(endpoint).unwrap_or_else(|_| (endpoint.to_string(), 0))
    }
}

pub struct ControlClient {
    config: RunConfig,
    defaults: ClientDefaults,
    dialers: Dialers,
    command_manager: Arc<CommandResponseManager>,
    notifications: Arc<NotificationDispatcher>,
    config_set_tx: mpsc::UnboundedSender<Vec<MappingConfig>>,
    tunnel_open_tx: mpsc::UnboundedSender<TunnelOpenRequestCmdBody>,

    stream: AsyncMutex<Option<PacketStream>>,
    chosen: std::sync::Mutex<Option<(ControlTransport, String)>>,
    client_id: AtomicI64,

    kicked: AtomicBool,
    auth_failed: AtomicBool,
    credentials_reset: AtomicBool,
    read_loop_running: AtomicBool,
    heartbeat_running: AtomicBool,

    exit_tx: watch::Sender<Option<ExitSignal>>,
}

impl ControlClient {
    pub fn new(
        config: RunConfig,
        defaults: ClientDefaults,
        notifications: Arc<NotificationDispatcher>,
        config_set_tx: mpsc::UnboundedSender<Vec<MappingConfig>>,
        tunnel_open_tx: mpsc::UnboundedSender<TunnelOpenRequestCmdBody>,
    ) -> Arc<Self> {
        let client_id = config.client.client_id.unwrap_or(0);
        let (exit_tx, _exit_rx) = watch::channel(None);
        Arc::new(Self {
            config,
            defaults,
            dialers: Dialers::new(),
            command_manager: Arc::new(CommandResponseManager::new()),
            notifications,
            config_set_tx,
            tunnel_open_tx,
            stream: AsyncMutex::new(None),
            chosen: std::sync::Mutex::new(None),
            client_id: AtomicI64::new(client_id),
            kicked: AtomicBool::new(false),
            auth_failed: AtomicBool::new(false),
            credentials_reset: AtomicBool::new(false),
            read_loop_running: AtomicBool::new(false),
            heartbeat_running: AtomicBool::new(false),
            exit_tx,
        })
    }

    pub fn client_id(&self) -> Option<i64> {
        match self.client_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn is_auth_failed(&self) -> bool {
        self.auth_failed.load(Ordering::SeqCst)
    }

    pub fn is_credentials_reset(&self) -> bool {
        self.credentials_reset.load(Ordering::SeqCst)
    }

    pub fn is_kicked(&self) -> bool {
        self.kicked.load(Ordering::SeqCst)
    }

    pub fn current_transport(&self) -> Option<ControlTransport> {
        self.chosen.lock().unwrap().as_ref().map(|(kind, _)| *kind)
    }

    /// Hand out the command/notification capability handles used by other
    /// modules to reach the server without holding a reference back into
    /// this struct (spec.md §9).
    pub fn command_manager(&self) -> Arc<CommandResponseManager> {
        self.command_manager.clone()
    }

    /// Connect once (explicit protocol, or auto-detection across
    /// `[websocket, quic, tcp, kcp]`) and complete the handshake.
    pub async fn connect(self: &Arc<Self>) -> ClientResult<()> {
        let (chosen, endpoint, mut stream) = match self.config.client.server_protocol.as_deref() {
            Some(proto) if proto.eq_ignore_ascii_case("http_poll")
                || proto.eq_ignore_ascii_case("http_long_poll") =>
            {
                let endpoint = self.config.client.server_address.clone();
                let stream = self.dial_http_poll(&endpoint, None).await?;
                (ControlTransport::HttpPoll, endpoint, stream)
            }
            Some(proto) => {
                let kind = parse_transport_kind(proto)?;
                let endpoint = self.config.client.server_address.clone();
                let (host, port) = split_endpoint(kind, &endpoint);
                let conn = self
                    .dialers
                    .for_kind(kind)
                    .dial(&host, port, DIAL_TIMEOUT)
                    .await?;
                (ControlTransport::Standard(kind), endpoint, PacketStream::new(conn))
            }
            None => self.auto_detect().await?,
        };

        self.handshake(&mut stream, chosen).await?;
        *self.stream.lock().await = Some(stream);
        *self.chosen.lock().unwrap() = Some((chosen, endpoint));
        info!(?chosen, "control connection established");
        Ok(())
    }

    /// Token sent as `Authorization: Bearer <token>` on the handshake and
    /// on every HTTP long-poll push/poll request.
    fn effective_token(&self) -> String {
        if self.config.client.anonymous {
            format!(
                "anonymous:{}",
                self.config.client.device_id.clone().unwrap_or_default()
            )
        } else {
            self.config.client.auth_token.clone()
        }
    }

    async fn dial_http_poll(
        &self,
        base_url: &str,
        mapping_id: Option<String>,
    ) -> ClientResult<PacketStream> {
        let http = tunnox_httppoll::HttpPollClient::new(base_url.to_string(), Some(self.effective_token()));
        let connection_id = uuid::Uuid::new_v4().to_string();
        let kind = if mapping_id.is_some() {
            tunnox_httppoll::TunnelKind::Data
        } else {
            tunnox_httppoll::TunnelKind::Control
        };
        let stream = tunnox_httppoll::HttpPollByteStream::connect(
            http,
            connection_id,
            kind,
            self.client_id(),
            mapping_id,
        );
        Ok(PacketStream::new(Box::new(stream)))
    }

    async fn auto_detect(&self) -> ClientResult<(ControlTransport, String, PacketStream)> {
        for round in 0..self.defaults.auto_connect_max_rounds as usize {
            let round_timeout = AUTO_DETECT_ROUND_TIMEOUTS
                .get(round)
                .copied()
                .unwrap_or(*AUTO_DETECT_ROUND_TIMEOUTS.last().unwrap());

            let attempt = async {
                for kind in TransportKind::PRIORITY_ORDER {
                    let endpoint = kind.default_endpoint(&self.defaults);
                    let (host, port) = split_endpoint(kind, endpoint);
                    debug!(?kind, %endpoint, round, "auto-detect attempt");
                    let conn = match self.dialers.for_kind(kind).dial(&host, port, DIAL_TIMEOUT).await {
                        Ok(c) => c,
                        Err(e) => {
                            debug!(?kind, "auto-detect dial failed: {e}");
                            continue;
                        }
                    };
                    let mut stream = PacketStream::new(conn);
                    let handshake = self.handshake(&mut stream, ControlTransport::Standard(kind));
                    match tokio::time::timeout(self.config.handshake_timeout, handshake).await {
                        Ok(Ok(())) => return Some((kind, stream)),
                        Ok(Err(e)) => {
                            debug!(?kind, "auto-detect handshake failed: {e}");
                        }
                        Err(_) => {
                            debug!(?kind, "auto-detect handshake timed out");
                        }
                    }
                }
                None
            };

            if let Ok(Some((kind, stream))) = tokio::time::timeout(round_timeout, attempt).await {
                let endpoint = kind.default_endpoint(&self.defaults).to_string();
                return Ok((ControlTransport::Standard(kind), endpoint, stream));
            }
        }
        Err(ClientError::AllTransportsFailed)
    }

    async fn handshake(
        &self,
        stream: &mut PacketStream,
        chosen: ControlTransport,
    ) -> ClientResult<()> {
        let request = HandshakeRequest {
            client_id: self.client_id(),
            token: self.effective_token(),
            version: tunnox_proto::PROTOCOL_VERSION,
            protocol: transport_name(chosen),
        };
        let body = Bytes::from(serde_json::to_vec(&request)?);
        stream
            .write_packet(&TransferPacket::new(PacketType::Handshake, body))
            .await?;

        let response_pkt = stream.read_packet().await?;
        if response_pkt.packet_type != PacketType::HandshakeResp {
            return Err(ClientError::HandshakeRejected(
                "expected HandshakeResp".into(),
            ));
        }
        let response: HandshakeResp = serde_json::from_slice(&response_pkt.body)?;
        if !response.success {
            let message = response.error.unwrap_or_default();
            let lower = message.to_ascii_lowercase();
            if lower.contains("auth") || lower.contains("token") {
                self.auth_failed.store(true, Ordering::SeqCst);
                return Err(ClientError::AuthFailed(message));
            }
            return Err(ClientError::HandshakeRejected(message));
        }

        if self.config.client.anonymous {
            if let Some(id) = response.message.as_deref().and_then(|m| m.parse::<i64>().ok()) {
                self.client_id.store(id, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Run the client until it is kicked, auth fails, or the caller drops
    /// the returned handle. Spawns the read and heartbeat loops.
    pub async fn run(self: Arc<Self>) -> ExitSignal {
        let mut exit_rx = self.exit_tx.subscribe();
        self.spawn_loops();
        loop {
            if let Some(signal) = *exit_rx.borrow() {
                return signal;
            }
            if exit_rx.changed().await.is_err() {
                return ExitSignal::Kicked;
            }
        }
    }

    fn spawn_loops(self: &Arc<Self>) {
        if !self.read_loop_running.swap(true, Ordering::SeqCst) {
            let this = self.clone();
            tokio::spawn(async move {
                this.read_loop().await;
                this.read_loop_running.store(false, Ordering::SeqCst);
            });
        }
        if !self.heartbeat_running.swap(true, Ordering::SeqCst) {
            let this = self.clone();
            tokio::spawn(async move {
                this.heartbeat_loop().await;
                this.heartbeat_running.store(false, Ordering::SeqCst);
            });
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            ticker.tick().await;
            if self.kicked.load(Ordering::SeqCst) || self.auth_failed.load(Ordering::SeqCst) {
                return;
            }
            let mut guard = self.stream.lock().await;
            if let Some(stream) = guard.as_mut() {
                if let Err(e) = stream.write_packet(&TransferPacket::heartbeat()).await {
                    warn!("heartbeat send failed: {e}");
                }
            }
        }
    }

    async fn read_loop(self: Arc<Self>) {
        loop {
            let result = self.dispatch_once().await;
            if self.kicked.load(Ordering::SeqCst) || self.auth_failed.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = result {
                warn!("control read loop error: {e}");
                *self.stream.lock().await = None;
                if !self.reconnect().await {
                    let _ = self.exit_tx.send(Some(ExitSignal::ReconnectExhausted));
                    return;
                }
            }
        }
    }

    async fn reconnect(self: &Arc<Self>) -> bool {
        let mut delay = self.config.reconnect_delay;
        for attempt in 1..=self.config.max_reconnect_attempts {
            info!(attempt, "attempting control channel reconnect");
            match self.connect().await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(attempt, "reconnect failed: {e}");
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.config.max_reconnect_delay);
                }
            }
        }
        false
    }

    async fn dispatch_once(self: &Arc<Self>) -> ClientResult<()> {
        let packet = {
            let mut guard = self.stream.lock().await;
            let stream = guard
                .as_mut()
                .ok_or(ClientError::Transport(TransportError::ConnectionClosed))?;
            stream.read_packet().await?
        };

        match packet.packet_type {
            PacketType::Heartbeat => {}
            PacketType::CommandResp => {
                let resp: CommandResponse = serde_json::from_slice(&packet.body)?;
                self.command_manager.handle_response(resp).await;
            }
            PacketType::JsonCommand => {
                let cmd: CommandPacket = serde_json::from_slice(&packet.body)?;
                self.handle_command(cmd).await?;
            }
            PacketType::TunnelOpen | PacketType::TunnelOpenAck => {
                debug!("ignoring tunnel packet on control connection");
            }
            PacketType::Handshake | PacketType::HandshakeResp => {
                debug!("ignoring stray handshake packet on established connection");
            }
        }
        Ok(())
    }

    async fn handle_command(self: &Arc<Self>, cmd: CommandPacket) -> ClientResult<()> {
        match cmd.command_type {
            CommandType::ConfigSet => {
                let body: ConfigSetBody = serde_json::from_value(cmd.command_body)?;
                let _ = self.config_set_tx.send(body.mappings);
            }
            CommandType::TunnelOpenRequestCmd => {
                let body: TunnelOpenRequestCmdBody = serde_json::from_value(cmd.command_body)?;
                let _ = self.tunnel_open_tx.send(body);
            }
            CommandType::KickClient => {
                let body: KickClientBody = serde_json::from_value(cmd.command_body)?;
                self.apply_kick(body);
            }
            CommandType::NotifyClient => {
                let n: ClientNotification = serde_json::from_value(cmd.command_body)?;
                let require_ack = self.notifications.dispatch(&n);
                if require_ack {
                    let this = self.clone();
                    let notify_id = n.notify_id.clone();
                    tokio::spawn(async move {
                        let _ = this
                            .send_command(
                                CommandType::NotifyClientAck,
                                serde_json::json!({ "notify_id": notify_id }),
                            )
                            .await;
                    });
                }
            }
            other => {
                debug!(?other, "command type not handled by this client");
            }
        }
        Ok(())
    }

    fn apply_kick(&self, body: KickClientBody) {
        self.kicked.store(true, Ordering::SeqCst);
        let signal = match body.code {
            KickReason::CredentialsReset => {
                self.credentials_reset.store(true, Ordering::SeqCst);
                ExitSignal::CredentialsReset
            }
            KickReason::AuthFailed | KickReason::Expired => {
                self.auth_failed.store(true, Ordering::SeqCst);
                ExitSignal::AuthFailed
            }
            KickReason::Other => ExitSignal::Kicked,
        };
        warn!(code = ?body.code, "client kicked by server");
        let _ = self.exit_tx.send(Some(signal));
    }

    /// Dial a fresh tunnel connection on the same transport/protocol as the
    /// control channel, exchange `TunnelOpen`/`TunnelOpenAck`, and switch
    /// the returned stream to stream mode (spec.md §4.10). `target` carries
    /// a dynamic SOCKS5 target when present.
    pub async fn dial_tunnel(
        &self,
        mapping_id: &str,
        tunnel_id: &str,
        secret_key: &str,
        target: Option<(String, u16)>,
    ) -> ClientResult<PacketStream> {
        let (chosen, endpoint) = self
            .chosen
            .lock()
            .unwrap()
            .clone()
            .ok_or(ClientError::Transport(TransportError::ConnectionClosed))?;

        let mut stream = match chosen {
            ControlTransport::HttpPoll => {
                self.dial_http_poll(&endpoint, Some(mapping_id.to_string())).await?
            }
            ControlTransport::Standard(kind) => {
                let (host, port) = split_endpoint(kind, &endpoint);
                let conn = self
                    .dialers
                    .for_kind(kind)
                    .dial(&host, port, DIAL_TIMEOUT)
                    .await?;
                PacketStream::new(conn)
            }
        };

        let request = tunnox_proto::TunnelOpenRequest {
            mapping_id: mapping_id.to_string(),
            tunnel_id: tunnel_id.to_string(),
            secret_key: secret_key.to_string(),
            target_host: target.as_ref().map(|(h, _)| h.clone()),
            target_port: target.as_ref().map(|(_, p)| *p),
        };
        let body = Bytes::from(serde_json::to_vec(&request)?);
        stream
            .write_packet(&TransferPacket::new(PacketType::TunnelOpen, body))
            .await?;

        let ack_pkt = stream.read_packet().await?;
        if ack_pkt.packet_type != PacketType::TunnelOpenAck {
            return Err(ClientError::TunnelOpenRejected(
                "expected TunnelOpenAck".into(),
            ));
        }
        let ack: tunnox_proto::TunnelOpenAck = serde_json::from_slice(&ack_pkt.body)?;
        if !ack.success {
            return Err(ClientError::TunnelOpenRejected(
                ack.error.unwrap_or_default(),
            ));
        }

        stream.set_stream_mode(true);
        Ok(stream)
    }

    /// Build a `JsonCommand`, register its id, send it, and wait for the
    /// matching `CommandResp` (spec.md §4.5/§4.6).
    pub async fn send_command(
        &self,
        command_type: CommandType,
        body: serde_json::Value,
    ) -> ClientResult<CommandResponse> {
        let packet = CommandPacket::new(command_type, body);
        let command_id = packet.command_id.clone();
        let rx = self.command_manager.register(command_id.clone()).await;

        {
            let mut guard = self.stream.lock().await;
            let stream = guard
                .as_mut()
                .ok_or(ClientError::Transport(TransportError::ConnectionClosed))?;
            let encoded = Bytes::from(serde_json::to_vec(&packet)?);
            stream
                .write_packet(&TransferPacket::new(PacketType::JsonCommand, encoded))
                .await?;
        }

        let response = self.command_manager.wait(&command_id, rx).await?;
        if !response.success {
            return Err(ClientError::CommandFailed(
                response.error.unwrap_or_default(),
            ));
        }
        Ok(response)
    }
}

fn transport_name(chosen: ControlTransport) -> String {
    match chosen {
        ControlTransport::Standard(TransportKind::WebSocket) => "websocket".into(),
        ControlTransport::Standard(TransportKind::Quic) => "quic".into(),
        ControlTransport::Standard(TransportKind::Tcp) => "tcp".into(),
        ControlTransport::Standard(TransportKind::Kcp) => "kcp".into(),
        ControlTransport::HttpPoll => "http_poll".into(),
    }
}

fn parse_transport_kind(proto: &str) -> ClientResult<TransportKind> {
    match proto.to_ascii_lowercase().as_str() {
        "websocket" | "ws" => Ok(TransportKind::WebSocket),
        "quic" => Ok(TransportKind::Quic),
        "tcp" => Ok(TransportKind::Tcp),
        "kcp" => Ok(TransportKind::Kcp),
        other => Err(ClientError::HandshakeRejected(format!(
            "unknown transport protocol '{other}'"
        ))),
    }
}

