//! Wire types and framing for the tunnox reverse-tunnel protocol.
//!
//! This crate carries no I/O of its own: it defines the packet framing,
//! the command/notification envelopes, the address-parsing rules, and the
//! per-process defaults (SaaS endpoints, transport priority) that every
//! other crate in the workspace builds on.

pub mod address;
pub mod command;
pub mod config;
pub mod defaults;
pub mod handshake;
pub mod notification;
pub mod packet;

pub use address::{parse_listen, parse_target, AddressError};
pub use command::{CommandEnvelope, CommandPacket, CommandResponse, CommandType};
pub use config::{ClientConfig, MappingConfig, MappingProtocol};
pub use defaults::{ClientDefaults, TransportKind};
pub use handshake::{
    HandshakeRequest, HandshakeResp, KickClientBody, KickReason, TunnelOpenAck,
    TunnelOpenRequest, TunnelOpenRequestCmdBody,
};
pub use notification::{ClientNotification, NotificationType};
pub use packet::{is_heartbeat_type_byte, PacketError, PacketType, TransferPacket};

/// Protocol version advertised in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum body size accepted by `read_packet` / the HTTP long-poll push path.
pub const MAX_BODY_SIZE: u32 = 10 * 1024 * 1024;
