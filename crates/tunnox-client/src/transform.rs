//! Compression/encryption/bandwidth-limiting are external collaborators
//! (spec.md §1 Non-goals): the packet stream and bidirectional copy only
//! need a pluggable boundary to call into, not an implementation.

use bytes::Bytes;

use crate::error::ClientResult;

/// Transforms applied to a packet body on the way out (`encode`) and on
/// the way in (`decode`). The identity transformer is the default; real
/// compression/encryption/rate-limiting live outside this crate.
pub trait StreamTransformer: Send + Sync {
    fn encode(&self, body: Bytes) -> ClientResult<Bytes>;
    fn decode(&self, body: Bytes) -> ClientResult<Bytes>;
}

pub struct IdentityTransformer;

impl StreamTransformer for IdentityTransformer {
    fn encode(&self, body: Bytes) -> ClientResult<Bytes> {
        Ok(body)
    }

    fn decode(&self, body: Bytes) -> ClientResult<Bytes> {
        Ok(body)
    }
}
