//! Per-process defaults: SaaS endpoints and transport auto-detection
//! priority (spec.md §6, §9). Constructed once at startup and shared as an
//! immutable reference — the only "global" state this workspace carries.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSocket,
    Quic,
    Tcp,
    Kcp,
}

impl TransportKind {
    /// Priority order tried by auto-detection, highest preference first.
    pub const PRIORITY_ORDER: [TransportKind; 4] = [
        TransportKind::WebSocket,
        TransportKind::Quic,
        TransportKind::Tcp,
        TransportKind::Kcp,
    ];

    pub fn default_endpoint(self, defaults: &ClientDefaults) -> &str {
        match self {
            TransportKind::WebSocket => &defaults.websocket_url,
            TransportKind::Quic => &defaults.quic_address,
            TransportKind::Tcp => &defaults.tcp_address,
            TransportKind::Kcp => &defaults.kcp_address,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientDefaults {
    pub websocket_url: String,
    pub quic_address: String,
    pub tcp_address: String,
    pub kcp_address: String,
    /// Number of auto-detection rounds (spec.md §4.6: `AutoConnectMaxRounds=2`).
    pub auto_connect_max_rounds: u32,
}

impl Default for ClientDefaults {
    fn default() -> Self {
        Self {
            websocket_url: "wss://ws.tunnox.net".to_string(),
            quic_address: "gw.tunnox.net:8443".to_string(),
            tcp_address: "gw.tunnox.net:8080".to_string(),
            kcp_address: "gw.tunnox.net:8000".to_string(),
            auto_connect_max_rounds: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_matches_spec() {
        assert_eq!(
            TransportKind::PRIORITY_ORDER,
            [
                TransportKind::WebSocket,
                TransportKind::Quic,
                TransportKind::Tcp,
                TransportKind::Kcp,
            ]
        );
    }
}
