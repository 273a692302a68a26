//! `HttpPollByteStream`: a `net.Conn`-like façade over POST push / GET poll.
//!
//! Three tasks run per connection (spec.md §5): the poll loop, the
//! write-flush loop, and the caller's own reader/writer via `AsyncRead` /
//! `AsyncWrite`. `Write` only ever appends to a buffer guarded by a mutex;
//! the flush loop ticks every 50 ms (or is woken early) and does the actual
//! network I/O.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::client::HttpPollClient;
use crate::header::{TunnelKind, TunnelPackage};
use crate::inbound::InboundAssembler;
use crate::outbound::{OutboundBuffer, ScanOutcome};

const FLUSH_TICK: Duration = Duration::from_millis(50);

pub struct HttpPollByteStream {
    outbound: Arc<Mutex<OutboundBuffer>>,
    flush_notify: Arc<Notify>,
    read_rx: mpsc::Receiver<Bytes>,
    read_leftover: bytes::BytesMut,
}

impl HttpPollByteStream {
    /// Dial a long-poll connection by spawning the flush and poll loops.
    /// `kind` selects whether inbound heartbeat filtering applies
    /// (control channels filter, data channels never do).
    pub fn connect(
        http: HttpPollClient,
        connection_id: impl Into<String>,
        kind: TunnelKind,
        client_id: Option<i64>,
        mapping_id: Option<String>,
    ) -> Self {
        let http = Arc::new(http);
        let connection_id = connection_id.into();

        let mut package = TunnelPackage::new(connection_id.clone(), kind);
        if let Some(id) = client_id {
            package = package.with_client_id(id);
        }
        if let Some(m) = mapping_id {
            package = package.with_mapping_id(m);
        }

        let outbound = Arc::new(Mutex::new(OutboundBuffer::new()));
        let flush_notify = Arc::new(Notify::new());
        let (read_tx, read_rx) = mpsc::channel::<Bytes>(256);

        let filter_heartbeats = matches!(kind, TunnelKind::Control);

        // Flush loop: scans the outbound buffer and pushes ready fragments.
        {
            let http = http.clone();
            let outbound = outbound.clone();
            let flush_notify = flush_notify.clone();
            let package = package.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(FLUSH_TICK) => {}
                        _ = flush_notify.notified() => {}
                    }
                    loop {
                        let outcome = outbound.lock().expect("outbound buffer lock poisoned").scan();
                        match outcome {
                            ScanOutcome::NeedMoreData => break,
                            ScanOutcome::Corrupt(e) => {
                                warn!("http long-poll outbound corruption, resetting buffer: {e}");
                                break;
                            }
                            ScanOutcome::Heartbeat => {
                                let hb = crate::fragment::split_into_fragments(
                                    uuid::Uuid::new_v4().to_string(),
                                    &[2u8],
                                );
                                for f in hb {
                                    if let Err(e) = http.push(&f, &package).await {
                                        warn!("heartbeat push failed: {e}");
                                    }
                                }
                            }
                            ScanOutcome::Ready(fragments) => {
                                for f in &fragments {
                                    if let Err(e) = http.push(f, &package).await {
                                        warn!("fragment push failed: {e}");
                                    }
                                }
                            }
                        }
                    }
                }
            });
        }

        // Poll loop: long-polls for inbound fragments and reassembles.
        {
            let http = http.clone();
            let package = package.clone();
            tokio::spawn(async move {
                let mut assembler = InboundAssembler::new(filter_heartbeats);
                loop {
                    match http.poll(&package).await {
                        Ok(Some((fragment, sequence_number))) => {
                            assembler.on_fragment(fragment, sequence_number);
                            let mut chunk = vec![0u8; 64 * 1024];
                            loop {
                                let n = assembler.read(&mut chunk);
                                if n == 0 {
                                    break;
                                }
                                if read_tx
                                    .send(Bytes::copy_from_slice(&chunk[..n]))
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            debug!("http long-poll poll failed: {e}");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            });
        }

        Self {
            outbound,
            flush_notify,
            read_rx,
            read_leftover: bytes::BytesMut::new(),
        }
    }

    /// Prepend bytes back onto the inbound stream: used by the
    /// command-response path when a packet turns out not to be the
    /// response it was waiting for.
    pub fn unread(&mut self, bytes: Bytes) {
        let mut combined = bytes::BytesMut::with_capacity(bytes.len() + self.read_leftover.len());
        combined.extend_from_slice(&bytes);
        combined.extend_from_slice(&self.read_leftover);
        self.read_leftover = combined;
    }

    /// Switch to stream mode: subsequent writes bypass buffering/framing
    /// and are POSTed directly as a single fragment group.
    pub fn enable_stream_mode(&self) {
        self.outbound
            .lock()
            .expect("outbound buffer lock poisoned")
            .enable_stream_mode();
    }
}

impl tunnox_transport::ByteStream for HttpPollByteStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl AsyncRead for HttpPollByteStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        use bytes::Buf;
        if self.read_leftover.is_empty() {
            match self.read_rx.poll_recv(cx) {
                Poll::Ready(Some(bytes)) => self.read_leftover.extend_from_slice(&bytes),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
        let n = std::cmp::min(self.read_leftover.len(), buf.remaining());
        buf.put_slice(&self.read_leftover[..n]);
        self.read_leftover.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for HttpPollByteStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.outbound
            .lock()
            .expect("outbound buffer lock poisoned")
            .push(buf);
        self.flush_notify.notify_one();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.flush_notify.notify_one();
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
