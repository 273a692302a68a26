//! Target-side tunnel handler (spec.md §4.12): reacts to a
//! `TunnelOpenRequestCmd` pushed from the control channel by dialing the
//! real target and a matching tunnel connection, then bridging the two.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::{info, warn};

use tunnox_proto::{MappingProtocol, TunnelOpenRequestCmdBody};

use crate::allowlist::Allowlist;
use crate::control::ControlClient;
use crate::target_manager::TargetTunnelManager;
use crate::tunnel;

const TARGET_DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_UDP_PACKET_SIZE: usize = 65535;

/// Consume `TunnelOpenRequestCmd` bodies for the life of the client.
/// Returns once the channel closes.
pub async fn run(
    control: Arc<ControlClient>,
    manager: Arc<TargetTunnelManager>,
    allowlist: Arc<Allowlist>,
    mut tunnel_open_rx: mpsc::UnboundedReceiver<TunnelOpenRequestCmdBody>,
) {
    while let Some(body) = tunnel_open_rx.recv().await {
        if !allowlist.is_allowed(&body.target_host, body.target_port) {
            warn!(tunnel_id = %body.tunnel_id, host = %body.target_host, port = body.target_port, "target rejected by allowlist");
            continue;
        }
        let control = control.clone();
        let manager = manager.clone();
        tokio::spawn(async move {
            handle_open_request(control, manager, body).await;
        });
    }
}

async fn handle_open_request(control: Arc<ControlClient>, manager: Arc<TargetTunnelManager>, body: TunnelOpenRequestCmdBody) {
    match body.protocol {
        MappingProtocol::Tcp | MappingProtocol::Socks5 | MappingProtocol::Socks => {
            handle_tcp(control, manager, body).await;
        }
        MappingProtocol::Udp => {
            handle_udp(control, manager, body).await;
        }
    }
}

async fn handle_tcp(control: Arc<ControlClient>, manager: Arc<TargetTunnelManager>, body: TunnelOpenRequestCmdBody) {
    let target_addr = format!("{}:{}", body.target_host, body.target_port);
    let target = match tokio::time::timeout(TARGET_DIAL_TIMEOUT, TcpStream::connect(&target_addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(tunnel_id = %body.tunnel_id, %target_addr, "target dial failed: {e}");
            return;
        }
        Err(_) => {
            warn!(tunnel_id = %body.tunnel_id, %target_addr, "target dial timed out");
            return;
        }
    };

    let tunnel_stream = match control
        .dial_tunnel(&body.mapping_id, &body.tunnel_id, &body.secret_key, None)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!(tunnel_id = %body.tunnel_id, "target-side tunnel dial failed: {e}");
            return;
        }
    };

    let cancel = manager.register(&body.tunnel_id);
    info!(tunnel_id = %body.tunnel_id, %target_addr, "target tunnel forwarding");
    tokio::select! {
        stats = tunnel::bidirectional_copy(target, tunnel_stream.into_inner()) => {
            if let Some(e) = stats.send_error.or(stats.receive_error) {
                warn!(tunnel_id = %body.tunnel_id, "target forward ended with error: {e}");
            }
        }
        () = cancel.cancelled() => {}
    }
    manager.close_tunnel(&body.tunnel_id);
}

async fn handle_udp(control: Arc<ControlClient>, manager: Arc<TargetTunnelManager>, body: TunnelOpenRequestCmdBody) {
    let target_addr = format!("{}:{}", body.target_host, body.target_port);
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(tunnel_id = %body.tunnel_id, "udp bind failed: {e}");
            return;
        }
    };
    if let Err(e) = socket.connect(&target_addr).await {
        warn!(tunnel_id = %body.tunnel_id, %target_addr, "udp connect failed: {e}");
        return;
    }

    let tunnel_stream = match control
        .dial_tunnel(&body.mapping_id, &body.tunnel_id, &body.secret_key, None)
        .await
    {
        Ok(stream) => stream,
        Err(e) => {
            warn!(tunnel_id = %body.tunnel_id, "target-side tunnel dial failed: {e}");
            return;
        }
    };
    let mut conn = tunnel_stream.into_inner();

    let cancel = manager.register(&body.tunnel_id);
    info!(tunnel_id = %body.tunnel_id, %target_addr, "target udp tunnel forwarding");

    let mut buf = vec![0u8; MAX_UDP_PACKET_SIZE];
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            received = socket.recv(&mut buf) => {
                match received {
                    Ok(n) => {
                        if tunnel::write_framed_datagram(&mut conn, &buf[..n]).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(tunnel_id = %body.tunnel_id, "udp recv failed: {e}");
                        break;
                    }
                }
            }
            frame = tunnel::read_framed_datagram(&mut conn) => {
                match frame {
                    Ok(Some(data)) => {
                        let _ = socket.send(&data).await;
                    }
                    _ => break,
                }
            }
            _ = tokio::time::sleep(UDP_IDLE_TIMEOUT) => break,
        }
    }
    manager.close_tunnel(&body.tunnel_id);
}
