//! HTTP long-poll adapter: a `net.Conn`-like byte stream built by
//! alternating POST `push` and GET `poll` against the gateway, with
//! Base64 fragment re-assembly in between (spec.md §4.3).

pub mod client;
pub mod corrupt;
pub mod dialer;
pub mod fragment;
pub mod header;
pub mod inbound;
pub mod outbound;
pub mod stream;

pub use client::{HttpPollClient, HttpPollError};
pub use dialer::HttpPollDialer;
pub use fragment::{FragmentReassembler, FragmentWire};
pub use header::{TunnelKind, TunnelPackage};
pub use stream::HttpPollByteStream;

/// Bodies above this size fail header validation before the full packet
/// is even waited for; mirrors `tunnox_proto::MAX_BODY_SIZE`.
pub const MAX_RAW_BODY_SIZE: u32 = tunnox_proto::MAX_BODY_SIZE;
