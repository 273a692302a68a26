use thiserror::Error;

use tunnox_proto::{AddressError, PacketError};
use tunnox_transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] PacketError),
    #[error("address error: {0}")]
    Address(#[from] AddressError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("command timed out after {0:?}")]
    CommandTimeout(std::time::Duration),
    #[error("command channel closed before a response arrived")]
    CommandChannelClosed,
    #[error("server returned error for command: {0}")]
    CommandFailed(String),
    #[error("port {0} is already in use")]
    PortConflict(u16),
    #[error("no transport succeeded during auto-detection")]
    AllTransportsFailed,
    #[error("tunnel open rejected: {0}")]
    TunnelOpenRejected(String),
    #[error("socks5 error: {0}")]
    Socks5(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
