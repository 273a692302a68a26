//! KCP adapter: reliability-in-user-space over UDP.
//!
//! No corpus example implements KCP; this is authored by analogy to the
//! shape of the TCP/QUIC adapters in this workspace, against the
//! `tokio-kcp` crate's `KcpStream`/`KcpConfig` API. Configured per
//! spec.md §4.2: `nodelay=1, interval=10ms, resend=2, nc=1, snd/rcv=1024,
//! mtu=1400`.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_kcp::{KcpConfig, KcpNoDelayConfig, KcpStream};

use crate::transport::{ByteStream, Dialer, TransportError};

pub fn spec_kcp_config() -> KcpConfig {
    KcpConfig {
        mtu: 1400,
        nodelay: KcpNoDelayConfig {
            nodelay: true,
            interval: 10,
            resend: 2,
            nc: true,
        },
        wnd_size: (1024, 1024),
        session_expire: Duration::from_secs(90),
        flush_write: false,
        flush_acks_input: false,
        stream: true,
    }
}

pub struct KcpByteStream {
    inner: KcpStream,
    remote: SocketAddr,
}

impl ByteStream for KcpByteStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}

impl AsyncRead for KcpByteStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for KcpByteStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[derive(Default)]
pub struct KcpDialer;

impl KcpDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for KcpDialer {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        let addr_str = format!("{host}:{port}");
        let remote: SocketAddr = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(TransportError::Io)?
            .next()
            .ok_or_else(|| TransportError::Kcp(format!("no address for {addr_str}")))?;

        let config = spec_kcp_config();
        let stream = tokio::time::timeout(timeout, KcpStream::connect(&config, remote))
            .await
            .map_err(|_| TransportError::DialTimeout(timeout))?
            .map_err(|e| TransportError::Kcp(e.to_string()))?;

        Ok(Box::new(KcpByteStream {
            inner: stream,
            remote,
        }))
    }

    fn name(&self) -> &'static str {
        "kcp"
    }
}
