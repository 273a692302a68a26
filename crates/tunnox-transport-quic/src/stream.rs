use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tunnox_transport::{ByteStream, Dialer, TransportError};

use crate::config::QuicConfig;

/// A QUIC connection's single bidirectional stream, exposed as one
/// `AsyncRead + AsyncWrite` byte stream.
pub struct QuicByteStream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
    remote: SocketAddr,
    // Keep the connection alive for the lifetime of the stream.
    _connection: quinn::Connection,
}

impl ByteStream for QuicByteStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}

impl AsyncRead for QuicByteStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for QuicByteStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.send).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_shutdown(cx)
    }
}

pub struct QuicDialer {
    config: QuicConfig,
}

impl QuicDialer {
    pub fn new(config: QuicConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Dialer for QuicDialer {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        let client_config = self
            .config
            .to_quinn_client_config()
            .map_err(|e| TransportError::Quic(e.to_string()))?;

        let remote: SocketAddr = tokio::net::lookup_host((host, port))
            .await
            .map_err(TransportError::Io)?
            .next()
            .ok_or_else(|| TransportError::Quic(format!("no address for {host}:{port}")))?;

        let bind_addr: SocketAddr = if remote.is_ipv6() {
            "[::]:0".parse().unwrap()
        } else {
            "0.0.0.0:0".parse().unwrap()
        };
        let mut endpoint = quinn::Endpoint::client(bind_addr)
            .map_err(|e| TransportError::Quic(e.to_string()))?;
        endpoint.set_default_client_config(client_config);

        let connecting = endpoint
            .connect(remote, host)
            .map_err(|e| TransportError::Quic(e.to_string()))?;

        let connection = tokio::time::timeout(timeout, connecting)
            .await
            .map_err(|_| TransportError::DialTimeout(timeout))?
            .map_err(|e| TransportError::Quic(e.to_string()))?;

        let (send, recv) = connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Quic(e.to_string()))?;

        Ok(Box::new(QuicByteStream {
            send,
            recv,
            remote,
            _connection: connection,
        }))
    }

    fn name(&self) -> &'static str {
        "quic"
    }
}
