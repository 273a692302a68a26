//! Fragment wire shape and the inbound re-assembler.
//!
//! A `FragmentGroup` is complete iff all indices `0..total_fragments` are
//! present; reassembly concatenates them in index order and must reproduce
//! `original_size` bytes exactly. Groups are released to readers in
//! strictly ascending `sequence_number` order even if a later group
//! completes first.

use std::collections::BTreeMap;

use base64::Engine;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

pub const MAX_FRAGMENT_SIZE: usize = 64 * 1024;

/// Wire shape of a single POST/GET fragment body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentWire {
    pub fragment_group_id: String,
    pub original_size: u32,
    pub fragment_size: u32,
    pub fragment_index: u32,
    pub total_fragments: u32,
    #[serde(with = "base64_data")]
    pub data: Bytes,
    pub timestamp: i64,
}

mod base64_data {
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Split raw packet bytes into ≤64 KB fragments sharing one `group_id`.
pub fn split_into_fragments(group_id: impl Into<String>, raw: &[u8]) -> Vec<FragmentWire> {
    let group_id = group_id.into();
    let original_size = raw.len() as u32;
    let chunks: Vec<&[u8]> = if raw.is_empty() {
        vec![&raw[0..0]]
    } else {
        raw.chunks(MAX_FRAGMENT_SIZE).collect()
    };
    let total = chunks.len() as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| FragmentWire {
            fragment_group_id: group_id.clone(),
            original_size,
            fragment_size: chunk.len() as u32,
            fragment_index: i as u32,
            total_fragments: total,
            data: Bytes::copy_from_slice(chunk),
            timestamp: 0,
        })
        .collect()
}

struct PendingGroup {
    original_size: u32,
    total_fragments: u32,
    received: BTreeMap<u32, Bytes>,
    sequence_number: u64,
}

impl PendingGroup {
    fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.total_fragments
    }

    fn reassemble(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.original_size as usize);
        for idx in 0..self.total_fragments {
            if let Some(chunk) = self.received.get(&idx) {
                buf.extend_from_slice(chunk);
            }
        }
        buf.freeze()
    }
}

/// Reassembles fragments keyed by `group_id`, releasing complete groups to
/// the caller in strictly ascending `sequence_number` order.
#[derive(Default)]
pub struct FragmentReassembler {
    groups: std::collections::HashMap<String, PendingGroup>,
    next_sequence_to_release: u64,
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Self {
            groups: std::collections::HashMap::new(),
            next_sequence_to_release: 0,
        }
    }

    pub fn insert(&mut self, fragment: FragmentWire, sequence_number: u64) {
        let group = self
            .groups
            .entry(fragment.fragment_group_id.clone())
            .or_insert_with(|| PendingGroup {
                original_size: fragment.original_size,
                total_fragments: fragment.total_fragments,
                received: BTreeMap::new(),
                sequence_number,
            });
        group.received.insert(fragment.fragment_index, fragment.data);
    }

    /// Returns the lowest unreleased `sequence_number` iff that group is
    /// complete, else `None`. Enforces in-order delivery even if later
    /// sequence numbers complete first.
    pub fn get_next_complete_group(&mut self) -> Option<Bytes> {
        let ready_key = self.groups.iter().find_map(|(key, group)| {
            if group.sequence_number == self.next_sequence_to_release && group.is_complete() {
                Some(key.clone())
            } else {
                None
            }
        })?;
        let group = self.groups.remove(&ready_key)?;
        self.next_sequence_to_release += 1;
        Some(group.reassemble())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_64kb_boundaries() {
        let raw = vec![0xabu8; 200_000];
        let fragments = split_into_fragments("g1", &raw);
        assert_eq!(fragments.len(), 4);
        assert_eq!(fragments[0].fragment_size as usize, MAX_FRAGMENT_SIZE);
        assert_eq!(fragments.last().unwrap().fragment_size, 200_000 - 3 * MAX_FRAGMENT_SIZE as u32);
    }

    #[test]
    fn out_of_order_fragments_reassemble_correctly() {
        let raw: Vec<u8> = (0..200_000u32).map(|i| (i % 256) as u8).collect();
        let fragments = split_into_fragments("g1", &raw);
        let mut reassembler = FragmentReassembler::new();
        for idx in [2, 0, 3, 1] {
            reassembler.insert(fragments[idx].clone(), 0);
        }
        let out = reassembler.get_next_complete_group().unwrap();
        assert_eq!(out.as_ref(), raw.as_slice());
    }

    #[test]
    fn groups_released_in_strictly_ascending_sequence_order() {
        let raw_a = vec![1u8; 10];
        let raw_b = vec![2u8; 10];
        let frags_a = split_into_fragments("a", &raw_a);
        let frags_b = split_into_fragments("b", &raw_b);

        let mut reassembler = FragmentReassembler::new();
        // group b (sequence_number 1) completes first...
        reassembler.insert(frags_b[0].clone(), 1);
        assert!(reassembler.get_next_complete_group().is_none());

        // ...but is not released until group a (sequence_number 0) arrives.
        reassembler.insert(frags_a[0].clone(), 0);
        let first = reassembler.get_next_complete_group().unwrap();
        assert_eq!(first.as_ref(), raw_a.as_slice());
        let second = reassembler.get_next_complete_group().unwrap();
        assert_eq!(second.as_ref(), raw_b.as_slice());
    }
}
