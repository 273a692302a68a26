//! Transport adapter trait plus the TCP and KCP implementations.
//!
//! QUIC and WebSocket adapters live in their own crates
//! (`tunnox-transport-quic`, `tunnox-transport-ws`) because each pulls in a
//! heavy, independent dependency stack; this crate holds the shared trait
//! plus the two adapters with no such stack of their own.

pub mod kcp;
pub mod tcp;
pub mod transport;

pub use kcp::KcpDialer;
pub use tcp::TcpDialer;
pub use transport::{ByteStream, Dialer, TransportError};
