//! QUIC adapter: one client connection, one stream per dial (spec.md §4.2).

pub mod config;
pub mod stream;

pub use config::QuicConfig;
pub use stream::{QuicByteStream, QuicDialer};
