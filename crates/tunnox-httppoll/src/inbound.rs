//! Inbound side: fragments arriving from poll responses are reassembled in
//! order and drained into a `read_buffer` that `Read` copies from.

use bytes::{Buf, Bytes, BytesMut};

use crate::fragment::FragmentReassembler;

const HEARTBEAT_BASE_TYPE: u8 = 2;
const BASE_TYPE_MASK: u8 = 0b0011_1111;

/// Buffers reassembled bytes for a `Read` caller. Control channels strip
/// stray 1-byte heartbeat packets out of the stream; data channels never
/// do, because `0x03` is valid byte content there.
pub struct InboundAssembler {
    reassembler: FragmentReassembler,
    read_buffer: BytesMut,
    filter_heartbeats: bool,
}

impl InboundAssembler {
    pub fn new(filter_heartbeats: bool) -> Self {
        Self {
            reassembler: FragmentReassembler::new(),
            read_buffer: BytesMut::new(),
            filter_heartbeats,
        }
    }

    /// Feed one fragment from a poll response. Drains every group that
    /// becomes releasable (in sequence order) into `read_buffer`.
    pub fn on_fragment(&mut self, fragment: crate::fragment::FragmentWire, sequence_number: u64) {
        self.reassembler.insert(fragment, sequence_number);
        while let Some(bytes) = self.reassembler.get_next_complete_group() {
            self.read_buffer.extend_from_slice(&bytes);
        }
        if self.filter_heartbeats {
            strip_stray_heartbeats(&mut self.read_buffer);
        }
    }

    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = std::cmp::min(self.read_buffer.len(), out.len());
        out[..n].copy_from_slice(&self.read_buffer[..n]);
        self.read_buffer.advance(n);
        n
    }

    pub fn has_data(&self) -> bool {
        !self.read_buffer.is_empty()
    }

    /// Prepend bytes back onto the front of `read_buffer`: used by the
    /// command-response path when it peeks a packet that isn't a
    /// command-response and must hand control back to the dispatcher.
    pub fn unread(&mut self, bytes: Bytes) {
        let mut combined = BytesMut::with_capacity(bytes.len() + self.read_buffer.len());
        combined.extend_from_slice(&bytes);
        combined.extend_from_slice(&self.read_buffer);
        self.read_buffer = combined;
    }
}

/// Heartbeats can be injected into a control channel's byte stream at any
/// point; a stray 1-byte value matching the heartbeat base type at the
/// front of the buffer is consumed and dropped rather than exposed to
/// `Read`. Only the leading run is stripped: a heartbeat byte that sits
/// inside a real packet body is indistinguishable from content and must
/// not be touched once it's past the front of the buffer.
fn strip_stray_heartbeats(buf: &mut BytesMut) {
    while !buf.is_empty() && buf[0] & BASE_TYPE_MASK == HEARTBEAT_BASE_TYPE {
        buf.advance(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::split_into_fragments;

    #[test]
    fn reassembles_and_exposes_via_read() {
        let raw = b"hello tunnel".to_vec();
        let fragments = split_into_fragments("g1", &raw);
        let mut assembler = InboundAssembler::new(false);
        for f in fragments {
            assembler.on_fragment(f, 0);
        }
        let mut out = [0u8; 32];
        let n = assembler.read(&mut out);
        assert_eq!(&out[..n], raw.as_slice());
    }

    #[test]
    fn unread_prepends_bytes() {
        let mut assembler = InboundAssembler::new(false);
        assembler.on_fragment(split_into_fragments("g1", b"BC").remove(0), 0);
        assembler.unread(Bytes::from_static(b"A"));
        let mut out = [0u8; 8];
        let n = assembler.read(&mut out);
        assert_eq!(&out[..n], b"ABC");
    }

    #[test]
    fn control_channel_strips_leading_heartbeat_byte() {
        let mut assembler = InboundAssembler::new(true);
        let mut body = vec![HEARTBEAT_BASE_TYPE];
        body.extend_from_slice(b"payload");
        assembler.on_fragment(split_into_fragments("g1", &body).remove(0), 0);
        let mut out = [0u8; 16];
        let n = assembler.read(&mut out);
        assert_eq!(&out[..n], b"payload");
    }

    #[test]
    fn data_channel_keeps_byte_matching_heartbeat_type() {
        let mut assembler = InboundAssembler::new(false);
        let body = vec![HEARTBEAT_BASE_TYPE, b'x'];
        assembler.on_fragment(split_into_fragments("g1", &body).remove(0), 0);
        let mut out = [0u8; 16];
        let n = assembler.read(&mut out);
        assert_eq!(&out[..n], &[HEARTBEAT_BASE_TYPE, b'x']);
    }
}
