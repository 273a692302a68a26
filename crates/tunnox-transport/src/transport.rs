//! Common transport trait: "given an address, produce a bidirectional
//! byte-stream" (spec.md §4.2). Generalized from the message-oriented
//! `Transport` trait this crate is descended from, since the packet stream
//! processor (in `tunnox-client`) needs a plain `AsyncRead + AsyncWrite`
//! byte stream rather than a discrete send/recv API — each tunnel dials a
//! fresh connection rather than opening a sub-stream on a shared one, so no
//! multiplexing capability is needed here.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("quic error: {0}")]
    Quic(String),
    #[error("kcp error: {0}")]
    Kcp(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("http long-poll error: {0}")]
    HttpPoll(String),
}

/// A dialed byte stream. Transports that are message-oriented on the wire
/// (WebSocket binary frames, KCP datagrams) adapt themselves to this
/// interface internally.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {
    fn local_addr(&self) -> Option<SocketAddr>;
    fn remote_addr(&self) -> Option<SocketAddr>;
}

/// Per-transport dial capability (spec.md §4.2).
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn ByteStream>, TransportError>;

    fn name(&self) -> &'static str;
}
