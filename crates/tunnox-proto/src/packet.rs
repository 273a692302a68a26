//! `TransferPacket` framing: `type:u8 | len:u32 (BE) | body` with the top
//! two bits of `type` reserved for compression/encryption flags.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::MAX_BODY_SIZE;

const FLAG_COMPRESSED: u8 = 0b0100_0000;
const FLAG_ENCRYPTED: u8 = 0b1000_0000;
const BASE_TYPE_MASK: u8 = 0b0011_1111;

/// Base packet types. `Heartbeat` is the only type with no length prefix or
/// body: the wire form of a heartbeat is a single type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Handshake,
    HandshakeResp,
    Heartbeat,
    JsonCommand,
    CommandResp,
    TunnelOpen,
    TunnelOpenAck,
    TunnelData,
}

impl PacketType {
    fn from_base(b: u8) -> Option<Self> {
        Some(match b {
            0 => PacketType::Handshake,
            1 => PacketType::HandshakeResp,
            2 => PacketType::Heartbeat,
            3 => PacketType::JsonCommand,
            4 => PacketType::CommandResp,
            5 => PacketType::TunnelOpen,
            6 => PacketType::TunnelOpenAck,
            7 => PacketType::TunnelData,
            _ => return None,
        })
    }

    fn base_value(self) -> u8 {
        match self {
            PacketType::Handshake => 0,
            PacketType::HandshakeResp => 1,
            PacketType::Heartbeat => 2,
            PacketType::JsonCommand => 3,
            PacketType::CommandResp => 4,
            PacketType::TunnelOpen => 5,
            PacketType::TunnelOpenAck => 6,
            PacketType::TunnelData => 7,
        }
    }
}

/// True if a raw type byte's base type (its low 6 bits) is `Heartbeat`,
/// without needing a full packet in hand. Used by readers that must
/// decide, from the type byte alone, whether to expect a length prefix.
pub fn is_heartbeat_type_byte(type_byte: u8) -> bool {
    type_byte & BASE_TYPE_MASK == PacketType::Heartbeat.base_value()
}

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("body exceeds max size ({0} > {1})")]
    BodyTooLarge(u32, u32),
    #[error("unknown base packet type {0}")]
    UnknownType(u8),
    #[error("buffer too short, need {0} more bytes")]
    Incomplete(usize),
}

/// A single framed packet, as read off (or written to) a byte stream.
#[derive(Debug, Clone)]
pub struct TransferPacket {
    pub packet_type: PacketType,
    pub compressed: bool,
    pub encrypted: bool,
    pub body: Bytes,
}

impl TransferPacket {
    pub fn new(packet_type: PacketType, body: Bytes) -> Self {
        Self {
            packet_type,
            compressed: false,
            encrypted: false,
            body,
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(PacketType::Heartbeat, Bytes::new())
    }

    fn type_byte(&self) -> u8 {
        let mut b = self.packet_type.base_value();
        if self.compressed {
            b |= FLAG_COMPRESSED;
        }
        if self.encrypted {
            b |= FLAG_ENCRYPTED;
        }
        b
    }

    /// Encode this packet onto `out`. Heartbeat is the single exception:
    /// it is exactly one byte, with no length prefix or body.
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.type_byte());
        if matches!(self.packet_type, PacketType::Heartbeat) {
            return;
        }
        out.put_u32(self.body.len() as u32);
        out.extend_from_slice(&self.body);
    }

    /// Decode a packet from the front of `buf`, advancing it past the bytes
    /// consumed. Returns `Ok(None)` if `buf` does not yet hold a complete
    /// packet (caller should read more and retry).
    pub fn try_decode(buf: &mut Bytes) -> Result<Option<Self>, PacketError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let type_byte = buf[0];
        let base = type_byte & BASE_TYPE_MASK;
        let packet_type =
            PacketType::from_base(base).ok_or(PacketError::UnknownType(type_byte))?;
        let compressed = type_byte & FLAG_COMPRESSED != 0;
        let encrypted = type_byte & FLAG_ENCRYPTED != 0;

        if matches!(packet_type, PacketType::Heartbeat) {
            buf.advance(1);
            return Ok(Some(Self {
                packet_type,
                compressed,
                encrypted,
                body: Bytes::new(),
            }));
        }

        if buf.len() < 5 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        if len > MAX_BODY_SIZE {
            return Err(PacketError::BodyTooLarge(len, MAX_BODY_SIZE));
        }
        let total = 5 + len as usize;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(5);
        let body = buf.split_to(len as usize);
        Ok(Some(Self {
            packet_type,
            compressed,
            encrypted,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_for_bodies_up_to_10mib() {
        for len in [0usize, 1, 64, 10 * 1024 * 1024] {
            let body = Bytes::from(vec![0xabu8; len]);
            let pkt = TransferPacket::new(PacketType::JsonCommand, body.clone());
            let mut out = BytesMut::new();
            pkt.encode(&mut out);
            let mut frozen = out.freeze();
            let decoded = TransferPacket::try_decode(&mut frozen).unwrap().unwrap();
            assert_eq!(decoded.packet_type, PacketType::JsonCommand);
            assert_eq!(decoded.body, body);
            assert!(frozen.is_empty());
        }
    }

    #[test]
    fn heartbeat_is_a_single_byte() {
        let pkt = TransferPacket::heartbeat();
        let mut out = BytesMut::new();
        pkt.encode(&mut out);
        assert_eq!(out.len(), 1);

        let mut frozen = out.freeze();
        let decoded = TransferPacket::try_decode(&mut frozen).unwrap().unwrap();
        assert_eq!(decoded.packet_type, PacketType::Heartbeat);
        assert!(frozen.is_empty());
    }

    #[test]
    fn incomplete_buffer_yields_none_not_error() {
        let pkt = TransferPacket::new(PacketType::TunnelData, Bytes::from_static(b"hello"));
        let mut out = BytesMut::new();
        pkt.encode(&mut out);
        out.truncate(out.len() - 2);
        let mut frozen = out.freeze();
        assert!(TransferPacket::try_decode(&mut frozen).unwrap().is_none());
    }

    #[test]
    fn oversized_body_is_rejected() {
        let mut out = BytesMut::new();
        out.put_u8(PacketType::JsonCommand.base_value());
        out.put_u32(MAX_BODY_SIZE + 1);
        let mut frozen = out.freeze();
        assert!(matches!(
            TransferPacket::try_decode(&mut frozen),
            Err(PacketError::BodyTooLarge(_, _))
        ));
    }
}
