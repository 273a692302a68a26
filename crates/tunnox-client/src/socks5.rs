//! RFC 1928 SOCKS5 listener (spec.md §4.9): no-auth negotiation, CONNECT
//! only, dynamic per-connection tunnel creation. Each accepted connection
//! dials its own tunnel carrying the client-supplied target, so a single
//! mapping can fan out to arbitrary destinations chosen by the SOCKS5
//! client rather than one fixed target.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use tunnox_proto::MappingConfig;

use crate::control::ControlClient;
use crate::error::{ClientError, ClientResult};
use crate::tunnel;

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(30);

const VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCESS: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ATYP_NOT_SUPPORTED: u8 = 0x08;

pub async fn accept_loop(listener: TcpListener, cfg: MappingConfig, control: Arc<ControlClient>, stop: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = stop.notified() => return,
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("socks5 accept failed: {e}");
                        continue;
                    }
                };
                let control = control.clone();
                let cfg = cfg.clone();
                tokio::spawn(async move {
                    if let Err(e) = tokio::time::timeout(
                        HANDSHAKE_DEADLINE,
                        handle_connection(socket, peer, &cfg, &control),
                    )
                    .await
                    {
                        warn!(mapping_id = %cfg.mapping_id, %peer, "socks5 handshake timed out after {:?}", e);
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    cfg: &MappingConfig,
    control: &Arc<ControlClient>,
) {
    if let Err(e) = negotiate_no_auth(&mut socket).await {
        warn!(%peer, "socks5 method negotiation failed: {e}");
        return;
    }

    let target = match read_connect_request(&mut socket).await {
        Ok(target) => target,
        Err(e) => {
            warn!(%peer, "socks5 request failed: {e}");
            return;
        }
    };

    let tunnel_id = Uuid::new_v4().to_string();
    let tunnel = control
        .dial_tunnel(&cfg.mapping_id, &tunnel_id, &cfg.secret_key, Some(target.clone()))
        .await;

    let tunnel = match tunnel {
        Ok(tunnel) => tunnel,
        Err(e) => {
            warn!(mapping_id = %cfg.mapping_id, %peer, ?target, "socks5 tunnel dial failed: {e}");
            let _ = send_reply(&mut socket, REPLY_GENERAL_FAILURE).await;
            return;
        }
    };

    if send_reply(&mut socket, REPLY_SUCCESS).await.is_err() {
        return;
    }

    info!(mapping_id = %cfg.mapping_id, %peer, target = ?target, "socks5 connection forwarding");
    let stats = tunnel::simple_bidirectional_copy(socket, tunnel.into_inner()).await;
    if let Some(e) = stats.send_error.or(stats.receive_error) {
        warn!(mapping_id = %cfg.mapping_id, %peer, "socks5 forward ended with error: {e}");
    }
}

async fn negotiate_no_auth(socket: &mut TcpStream) -> ClientResult<()> {
    let mut header = [0u8; 2];
    socket.read_exact(&mut header).await?;
    if header[0] != VERSION {
        return Err(ClientError::Socks5(format!("unsupported version {}", header[0])));
    }
    let nmethods = header[1] as usize;
    let mut methods = vec![0u8; nmethods];
    socket.read_exact(&mut methods).await?;

    if !methods.contains(&0x00) {
        socket.write_all(&[VERSION, 0xFF]).await?;
        return Err(ClientError::Socks5("client offered no acceptable auth method".into()));
    }
    socket.write_all(&[VERSION, 0x00]).await?;
    Ok(())
}

async fn read_connect_request(socket: &mut TcpStream) -> ClientResult<(String, u16)> {
    let mut header = [0u8; 4];
    socket.read_exact(&mut header).await?;
    let [ver, cmd, _rsv, atyp] = header;
    if ver != VERSION {
        return Err(ClientError::Socks5(format!("unsupported version {ver}")));
    }
    if cmd != CMD_CONNECT {
        send_reply(socket, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(ClientError::Socks5(format!("unsupported command {cmd}")));
    }

    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            socket.read_exact(&mut octets).await?;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            socket.read_exact(&mut octets).await?;
            std::net::Ipv6Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            socket.read_exact(&mut len).await?;
            let mut domain = vec![0u8; len[0] as usize];
            socket.read_exact(&mut domain).await?;
            String::from_utf8(domain).map_err(|e| ClientError::Socks5(e.to_string()))?
        }
        other => {
            send_reply(socket, REPLY_ATYP_NOT_SUPPORTED).await?;
            return Err(ClientError::Socks5(format!("unsupported address type {other}")));
        }
    };

    let mut port_bytes = [0u8; 2];
    socket.read_exact(&mut port_bytes).await?;
    let port = u16::from_be_bytes(port_bytes);

    Ok((host, port))
}

/// Fixed `0.0.0.0:0` bound address: this client never actually binds a
/// local socket on the target's behalf, so there is no real address to
/// report back.
async fn send_reply(socket: &mut TcpStream, code: u8) -> ClientResult<()> {
    let reply = [VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];
    socket.write_all(&reply).await?;
    Ok(())
}
