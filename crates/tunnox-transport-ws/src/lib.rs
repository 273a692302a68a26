//! WebSocket adapter: binary frames map 1:1 to byte-stream reads/writes
//! (spec.md §4.2). URL normalized from `http(s)://host[:port][/path]` or a
//! bare host to `ws(s)://…/_tunnox`.

pub mod normalize;
pub mod stream;

pub use normalize::normalize_ws_url;
pub use stream::{WsByteStream, WsDialer};
