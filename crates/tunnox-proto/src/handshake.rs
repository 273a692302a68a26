//! JSON bodies carried inside the non-command base packet types:
//! `Handshake` / `HandshakeResp` (control channel bring-up) and
//! `TunnelOpen` / `TunnelOpenAck` (tunnel establishment, spec.md §4.10).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub client_id: Option<i64>,
    /// The bearer token, or `"anonymous:"` + device id for anonymous clients.
    pub token: String,
    pub version: u32,
    pub protocol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResp {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of a `TunnelOpen` packet. `target_host`/`target_port` are only
/// present for dynamic-target (SOCKS5) tunnels; absent otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelOpenRequest {
    pub mapping_id: String,
    pub tunnel_id: String,
    pub secret_key: String,
    #[serde(default)]
    pub target_host: Option<String>,
    #[serde(default)]
    pub target_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelOpenAck {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of a `JsonCommand{TunnelOpenRequestCmd}` delivered to the
/// target-side client (spec.md §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelOpenRequestCmdBody {
    pub tunnel_id: String,
    pub mapping_id: String,
    pub secret_key: String,
    pub target_host: String,
    pub target_port: u16,
    pub protocol: crate::config::MappingProtocol,
    #[serde(default)]
    pub enable_compression: bool,
    #[serde(default)]
    pub compression_level: i32,
    #[serde(default)]
    pub enable_encryption: bool,
    #[serde(default)]
    pub encryption_method: Option<String>,
    #[serde(default)]
    pub encryption_key: Option<String>,
    #[serde(default)]
    pub bandwidth_limit: Option<u64>,
}

/// Body of a `JsonCommand{KickClient}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KickReason {
    CredentialsReset,
    AuthFailed,
    Expired,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickClientBody {
    pub code: KickReason,
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kick_code_maps_to_other() {
        let v = serde_json::json!({"code": "something_new"});
        let body: KickClientBody = serde_json::from_value(v).unwrap();
        assert_eq!(body.code, KickReason::Other);
    }

    #[test]
    fn known_kick_codes_round_trip() {
        for (raw, expected) in [
            ("credentials_reset", KickReason::CredentialsReset),
            ("auth_failed", KickReason::AuthFailed),
            ("expired", KickReason::Expired),
        ] {
            let v = serde_json::json!({"code": raw});
            let body: KickClientBody = serde_json::from_value(v).unwrap();
            assert_eq!(body.code, expected);
        }
    }
}
