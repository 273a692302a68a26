//! Outbound write buffer: `Write` appends, a flush loop scans the buffer on
//! a tick and turns whatever is ready into a fragment group to push.

use bytes::{Buf, Bytes, BytesMut};
use tunnox_proto::packet::{PacketError, PacketType};
use tunnox_proto::TransferPacket;

use crate::corrupt::{self, CorruptionError};
use crate::fragment::{split_into_fragments, FragmentWire};

#[derive(Debug)]
pub enum ScanOutcome {
    /// Not enough bytes buffered yet to make a decision.
    NeedMoreData,
    /// A 1-byte heartbeat packet, emitted immediately ahead of anything
    /// else queued behind it.
    Heartbeat,
    /// A complete packet was buffered and split into fragments sharing one
    /// `fragment_group_id`.
    Ready(Vec<FragmentWire>),
    /// The header looked corrupt; the caller should reset the buffer.
    Corrupt(CorruptionError),
}

/// Append-only outbound staging buffer, plus the stream-mode bypass used
/// after a tunnel mode switch.
pub struct OutboundBuffer {
    buf: BytesMut,
    stream_mode: bool,
}

impl OutboundBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            stream_mode: false,
        }
    }

    pub fn enable_stream_mode(&mut self) {
        self.stream_mode = true;
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// In stream mode, bypass framing entirely: whatever is buffered goes
    /// out as a single fragment group, preserving protocol packet
    /// boundaries from the caller's `Write` calls.
    fn scan_stream_mode(&mut self) -> ScanOutcome {
        if self.buf.is_empty() {
            return ScanOutcome::NeedMoreData;
        }
        let raw = self.buf.split().freeze();
        let group_id = uuid::Uuid::new_v4().to_string();
        ScanOutcome::Ready(split_into_fragments(group_id, &raw))
    }

    pub fn scan(&mut self) -> ScanOutcome {
        if self.stream_mode {
            return self.scan_stream_mode();
        }
        if self.buf.is_empty() {
            return ScanOutcome::NeedMoreData;
        }

        let probe_start = Bytes::copy_from_slice(&self.buf);
        let mut probe = probe_start.clone();
        match TransferPacket::try_decode(&mut probe) {
            Ok(None) => ScanOutcome::NeedMoreData,
            Ok(Some(pkt)) => {
                let consumed = probe_start.len() - probe.len();
                if matches!(pkt.packet_type, PacketType::Heartbeat) {
                    self.buf.advance(consumed);
                    return ScanOutcome::Heartbeat;
                }
                if self.buf.len() >= 5 {
                    let header: [u8; 5] = self.buf[0..5].try_into().unwrap();
                    if let Err(e) = corrupt::validate_header(&header) {
                        self.buf.clear();
                        return ScanOutcome::Corrupt(e);
                    }
                }
                let raw = probe_start.slice(0..consumed);
                self.buf.advance(consumed);
                let group_id = uuid::Uuid::new_v4().to_string();
                ScanOutcome::Ready(split_into_fragments(group_id, &raw))
            }
            Err(PacketError::BodyTooLarge(len, max)) => {
                self.buf.clear();
                ScanOutcome::Corrupt(CorruptionError::BodyTooLarge(len, max))
            }
            Err(PacketError::UnknownType(_)) | Err(PacketError::Incomplete(_)) => {
                self.buf.clear();
                ScanOutcome::Corrupt(CorruptionError::AllBytesEqual)
            }
        }
    }
}

impl Default for OutboundBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_emitted_immediately() {
        let mut buf = BytesMut::new();
        TransferPacket::heartbeat().encode(&mut buf);
        let mut out = OutboundBuffer::new();
        out.push(&buf);
        assert!(matches!(out.scan(), ScanOutcome::Heartbeat));
    }

    #[test]
    fn buffered_packet_splits_into_fragments_sharing_a_group() {
        let body = vec![0x42u8; 200_000];
        let pkt = TransferPacket::new(PacketType::TunnelData, Bytes::from(body));
        let mut buf = BytesMut::new();
        pkt.encode(&mut buf);

        let mut out = OutboundBuffer::new();
        out.push(&buf);
        match out.scan() {
            ScanOutcome::Ready(fragments) => {
                assert!(fragments.len() > 1);
                let group_id = fragments[0].fragment_group_id.clone();
                assert!(fragments.iter().all(|f| f.fragment_group_id == group_id));
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn stream_mode_bypasses_framing() {
        let mut out = OutboundBuffer::new();
        out.enable_stream_mode();
        out.push(b"raw socks5 bytes");
        match out.scan() {
            ScanOutcome::Ready(fragments) => {
                assert_eq!(fragments.len(), 1);
                assert_eq!(fragments[0].data.as_ref(), b"raw socks5 bytes");
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }
}
