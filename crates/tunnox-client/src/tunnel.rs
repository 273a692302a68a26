//! Bidirectional forwarding between two already-connected byte streams
//! (spec.md §4.11). Tunnel establishment itself (`dial_tunnel`) lives on
//! `ControlClient` since it needs the control channel's chosen transport;
//! this module only covers the copy phase once both ends are connected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Default, Clone)]
pub struct CopyStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_error: Option<String>,
    pub receive_error: Option<String>,
}

/// Copies like `tokio::io::copy`, but records bytes transferred into a
/// shared counter as it goes rather than only on return. Needed so an
/// aborted copy still leaves behind an accurate byte count for the
/// direction that was cut short (spec.md §4.11 Testable Property #2).
async fn copy_counting<R, W>(mut r: R, mut w: W, counted: Arc<AtomicU64>) -> Option<String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = match r.read(&mut buf).await {
            Ok(0) => return None,
            Ok(n) => n,
            Err(e) => return Some(e.to_string()),
        };
        if let Err(e) = w.write_all(&buf[..n]).await {
            return Some(e.to_string());
        }
        counted.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// Copies both directions concurrently; as soon as either direction
/// finishes (EOF or error) the other is aborted. Appropriate for the
/// common tunnel forwarding case, where one side closing means the whole
/// flow is over. Byte counts come from counters updated as data moves
/// rather than from the spawned tasks' return values, since an aborted
/// `JoinHandle` always resolves to `Err` and would otherwise lose the
/// loser's count.
pub async fn bidirectional_copy<A, B>(a: A, b: B) -> CopyStats
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ar, aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);

    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));

    let mut to_b = tokio::spawn(copy_counting(ar, bw, sent.clone()));
    let mut to_a = tokio::spawn(copy_counting(br, aw, received.clone()));

    let (send_error, receive_error) = tokio::select! {
        result = &mut to_b => {
            let send_error = result.unwrap_or_else(|_| Some("forward task panicked".into()));
            to_a.abort();
            let receive_error = match to_a.await {
                Ok(e) => e,
                Err(e) if e.is_cancelled() => None,
                Err(_) => Some("forward task panicked".into()),
            };
            (send_error, receive_error)
        }
        result = &mut to_a => {
            let receive_error = result.unwrap_or_else(|_| Some("forward task panicked".into()));
            to_b.abort();
            let send_error = match to_b.await {
                Ok(e) => e,
                Err(e) if e.is_cancelled() => None,
                Err(_) => Some("forward task panicked".into()),
            };
            (send_error, receive_error)
        }
    };

    CopyStats {
        bytes_sent: sent.load(Ordering::Relaxed),
        bytes_received: received.load(Ordering::Relaxed),
        send_error,
        receive_error,
    }
}

async fn copy_then_shutdown<R, W>(mut r: R, mut w: W) -> (u64, Option<String>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 32 * 1024];
    let mut total = 0u64;
    loop {
        let n = match r.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => return (total, Some(e.to_string())),
        };
        if let Err(e) = w.write_all(&buf[..n]).await {
            return (total, Some(e.to_string()));
        }
        total += n as u64;
    }
    let _ = w.shutdown().await;
    (total, None)
}

/// Half-close variant: each direction shuts down only its own write side
/// on EOF, letting the other direction keep draining independently. Needed
/// for HTTP over SOCKS5, where the client shuts its send side after
/// issuing a request but still expects the response (spec.md §4.11).
pub async fn simple_bidirectional_copy<A, B>(a: A, b: B) -> CopyStats
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ar, aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);

    let to_b = tokio::spawn(copy_then_shutdown(ar, bw));
    let to_a = tokio::spawn(copy_then_shutdown(br, aw));

    let (to_b_result, to_a_result) = tokio::join!(to_b, to_a);
    let (bytes_sent, send_error) = to_b_result.unwrap_or((0, Some("forward task panicked".into())));
    let (bytes_received, receive_error) = to_a_result.unwrap_or((0, Some("forward task panicked".into())));
    CopyStats {
        bytes_sent,
        bytes_received,
        send_error,
        receive_error,
    }
}

/// Maximum single UDP datagram carried over a tunnel (spec.md §4.12).
pub const MAX_UDP_PACKET_SIZE: usize = 65535;

/// Write one length-prefixed datagram, the framing UDP mappings use over an
/// otherwise byte-oriented tunnel connection (spec.md §4.8, §4.12).
pub async fn write_framed_datagram(conn: &mut (impl AsyncWrite + Unpin), data: &[u8]) -> std::io::Result<()> {
    conn.write_all(&(data.len() as u32).to_be_bytes()).await?;
    conn.write_all(data).await
}

/// Read one length-prefixed datagram; `Ok(None)` means the tunnel reached
/// EOF cleanly between datagrams.
pub async fn read_framed_datagram(conn: &mut (impl AsyncRead + Unpin)) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match conn.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut data = vec![0u8; len.min(MAX_UDP_PACKET_SIZE)];
    conn.read_exact(&mut data).await?;
    Ok(Some(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn copies_data_written_before_eof_in_both_directions() {
        let (mut client_a, server_a) = duplex(1024);
        let (mut client_b, server_b) = duplex(1024);

        client_a.write_all(b"hello").await.unwrap();
        client_a.shutdown().await.unwrap();
        client_b.write_all(b"world").await.unwrap();
        client_b.shutdown().await.unwrap();

        let stats = bidirectional_copy(server_a, server_b).await;
        assert_eq!(stats.bytes_sent, 5);
        assert_eq!(stats.bytes_received, 5);

        let mut buf = Vec::new();
        client_a.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"world");
    }
}
