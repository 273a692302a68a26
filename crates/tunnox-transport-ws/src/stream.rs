use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use tunnox_transport::{ByteStream, Dialer, TransportError};

use crate::normalize::normalize_ws_url;

/// Binary-frame WebSocket connection exposed as a byte stream. A read
/// buffer absorbs partial frame consumption, matching spec.md §4.2.
pub struct WsByteStream {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    read_rx: mpsc::Receiver<Bytes>,
    read_buf: BytesMut,
    remote: SocketAddr,
}

impl ByteStream for WsByteStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}

impl AsyncRead for WsByteStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.read_buf.is_empty() {
            match self.read_rx.poll_recv(cx) {
                Poll::Ready(Some(bytes)) => self.read_buf.extend_from_slice(&bytes),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = std::cmp::min(self.read_buf.len(), buf.remaining());
        buf.put_slice(&self.read_buf[..n]);
        self.read_buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for WsByteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.write_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "websocket writer task gone",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub struct WsDialer;

impl WsDialer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WsDialer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        let endpoint = if port == 0 {
            host.to_string()
        } else {
            format!("{host}:{port}")
        };
        let url = normalize_ws_url(&endpoint);

        let remote: SocketAddr = tokio::net::lookup_host((host, if port == 0 { 443 } else { port }))
            .await
            .ok()
            .and_then(|mut it| it.next())
            .unwrap_or_else(|| "0.0.0.0:0".parse().unwrap());

        let (ws_stream, _response) =
            tokio::time::timeout(timeout, tokio_tungstenite::connect_async(&url))
                .await
                .map_err(|_| TransportError::DialTimeout(timeout))?
                .map_err(|e| TransportError::WebSocket(e.to_string()))?;

        let (mut sink, mut source) = ws_stream.split();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (read_tx, read_rx) = mpsc::channel::<Bytes>(256);

        tokio::spawn(async move {
            while let Some(frame) = write_rx.recv().await {
                if sink.send(Message::Binary(frame)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        if read_tx.send(Bytes::from(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("websocket transport closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("websocket read error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Box::new(WsByteStream {
            write_tx,
            read_rx,
            read_buf: BytesMut::new(),
            remote,
        }))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
