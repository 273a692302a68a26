//! `X-Tunnel-Package` identity header sent on every push/poll request.

use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelKind {
    Control,
    Data,
    Keepalive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelPackage {
    pub connection_id: String,
    pub request_id: String,
    pub client_id: Option<i64>,
    pub mapping_id: Option<String>,
    pub tunnel_type: TunnelKind,
}

impl TunnelPackage {
    pub fn new(connection_id: impl Into<String>, tunnel_type: TunnelKind) -> Self {
        Self {
            connection_id: connection_id.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
            client_id: None,
            mapping_id: None,
            tunnel_type,
        }
    }

    pub fn with_client_id(mut self, client_id: i64) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn with_mapping_id(mut self, mapping_id: impl Into<String>) -> Self {
        self.mapping_id = Some(mapping_id.into());
        self
    }

    /// Opaque header value: base64 of the JSON encoding.
    pub fn header_value(&self) -> String {
        let json = serde_json::to_vec(self).expect("TunnelPackage always serializes");
        base64::engine::general_purpose::STANDARD.encode(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_value_round_trips() {
        let pkg = TunnelPackage::new("conn-1", TunnelKind::Control)
            .with_client_id(42)
            .with_mapping_id("map-1");
        let encoded = pkg.header_value();
        let decoded_json =
            base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let decoded: TunnelPackage = serde_json::from_slice(&decoded_json).unwrap();
        assert_eq!(decoded.connection_id, "conn-1");
        assert_eq!(decoded.client_id, Some(42));
        assert_eq!(decoded.tunnel_type, TunnelKind::Control);
    }
}
