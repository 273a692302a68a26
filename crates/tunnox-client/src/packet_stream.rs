//! Framed read/write of `TransferPacket`s over any byte stream
//! (spec.md §4.4). Transparently applies the configured `StreamTransformer`
//! when a packet's compression/encryption flag bits are set. Exposes a
//! stream-mode toggle: once flipped, outer read loops must stop calling
//! `read_packet` and read raw bytes from the underlying connection
//! instead (spec.md §9, "stream-mode toggle is the linchpin").

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tunnox_proto::TransferPacket;
use tunnox_transport::ByteStream;

use crate::error::{ClientError, ClientResult};
use crate::transform::{IdentityTransformer, StreamTransformer};

pub struct PacketStream {
    conn: Box<dyn ByteStream>,
    transformer: Arc<dyn StreamTransformer>,
    stream_mode: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl PacketStream {
    pub fn new(conn: Box<dyn ByteStream>) -> Self {
        Self::with_transformer(conn, Arc::new(IdentityTransformer))
    }

    pub fn with_transformer(conn: Box<dyn ByteStream>, transformer: Arc<dyn StreamTransformer>) -> Self {
        Self {
            conn,
            transformer,
            stream_mode: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_stream_mode(&self) -> bool {
        self.stream_mode.load(Ordering::Acquire)
    }

    pub fn set_stream_mode(&self, enabled: bool) {
        self.stream_mode.store(enabled, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Read one packet off the underlying connection, decoding the body if
    /// its flag bits say it was compressed/encrypted.
    pub async fn read_packet(&mut self) -> ClientResult<TransferPacket> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream closed",
            )));
        }

        let mut type_byte = [0u8; 1];
        self.conn.read_exact(&mut type_byte).await?;

        const FLAG_COMPRESSED: u8 = 0b0100_0000;
        const FLAG_ENCRYPTED: u8 = 0b1000_0000;

        if tunnox_proto::is_heartbeat_type_byte(type_byte[0]) {
            return Ok(TransferPacket::heartbeat());
        }

        let mut len_bytes = [0u8; 4];
        self.conn.read_exact(&mut len_bytes).await?;
        let len = u32::from_be_bytes(len_bytes);
        if len > tunnox_proto::MAX_BODY_SIZE {
            return Err(ClientError::Protocol(tunnox_proto::PacketError::BodyTooLarge(
                len,
                tunnox_proto::MAX_BODY_SIZE,
            )));
        }

        let mut body = vec![0u8; len as usize];
        self.conn.read_exact(&mut body).await?;

        let compressed = type_byte[0] & FLAG_COMPRESSED != 0;
        let encrypted = type_byte[0] & FLAG_ENCRYPTED != 0;
        let mut body = Bytes::from(body);
        if compressed || encrypted {
            body = self.transformer.decode(body)?;
        }

        let mut full = BytesMut::with_capacity(5 + body.len());
        full.extend_from_slice(&type_byte);
        full.extend_from_slice(&(body.len() as u32).to_be_bytes());
        full.extend_from_slice(&body);
        let mut frozen = full.freeze();
        let pkt = TransferPacket::try_decode(&mut frozen)?
            .expect("just assembled a complete packet");
        Ok(pkt)
    }

    /// Write one packet, applying the transformer if the packet requests
    /// compression/encryption.
    pub async fn write_packet(&mut self, packet: &TransferPacket) -> ClientResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "stream closed",
            )));
        }

        let mut pkt = packet.clone();
        if pkt.compressed || pkt.encrypted {
            pkt.body = self.transformer.encode(pkt.body)?;
        }

        let mut out = BytesMut::new();
        pkt.encode(&mut out);
        self.conn.write_all(&out).await?;
        self.conn.flush().await?;
        Ok(())
    }

    /// Hand back the underlying connection, e.g. to fall through to raw
    /// byte copy after a tunnel mode switch.
    pub fn into_inner(self) -> Box<dyn ByteStream> {
        self.conn
    }
}
