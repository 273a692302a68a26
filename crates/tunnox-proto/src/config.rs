//! `ClientConfig` / `MappingConfig` data model (spec.md §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingProtocol {
    Tcp,
    Udp,
    Socks5,
    Socks,
}

impl MappingProtocol {
    pub fn from_scheme(scheme: &str) -> Self {
        match scheme {
            "udp" => MappingProtocol::Udp,
            "socks5" => MappingProtocol::Socks5,
            "socks" => MappingProtocol::Socks,
            _ => MappingProtocol::Tcp,
        }
    }

    pub fn is_socks(self) -> bool {
        matches!(self, MappingProtocol::Socks5 | MappingProtocol::Socks)
    }
}

/// Client identity and server endpoint, loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: Option<i64>,
    pub auth_token: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    pub server_address: String,
    #[serde(default)]
    pub server_protocol: Option<String>,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct ClientConfigBuilder {
    client_id: Option<i64>,
    auth_token: String,
    device_id: Option<String>,
    anonymous: bool,
    server_address: String,
    server_protocol: Option<String>,
}

impl ClientConfigBuilder {
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = token.into();
        self
    }

    pub fn server_address(mut self, addr: impl Into<String>) -> Self {
        self.server_address = addr.into();
        self
    }

    pub fn anonymous(mut self, device_id: impl Into<String>) -> Self {
        self.anonymous = true;
        self.device_id = Some(device_id.into());
        self
    }

    pub fn server_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.server_protocol = Some(protocol.into());
        self
    }

    pub fn build(self) -> Result<ClientConfig, String> {
        if self.server_address.is_empty() {
            return Err("server_address is required".to_string());
        }
        if !self.anonymous && self.auth_token.is_empty() {
            return Err("auth_token is required unless anonymous".to_string());
        }
        Ok(ClientConfig {
            client_id: self.client_id,
            auth_token: self.auth_token,
            device_id: self.device_id,
            anonymous: self.anonymous,
            server_address: self.server_address,
            server_protocol: self.server_protocol,
        })
    }
}

/// A single server-pushed mapping rule (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingConfig {
    pub mapping_id: String,
    pub protocol: MappingProtocol,
    /// `0` means this mapping is target-side only: no local listener.
    pub local_port: u16,
    pub target_host: String,
    pub target_port: u16,
    pub target_client_id: i64,
    pub secret_key: String,

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
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub bandwidth_limit: Option<u64>,
}

impl MappingConfig {
    /// Listener-side iff `local_port > 0` (spec.md §3 invariant).
    pub fn is_listener_side(&self) -> bool {
        self.local_port > 0
    }

    /// Structural equality over every runtime-relevant field, used by the
    /// mapping manager to decide whether a `ConfigSet` update requires
    /// stop-then-restart of the handler (spec.md §4.8). `PartialEq` already
    /// compares every field, so this is just a readable alias.
    pub fn structurally_equal(&self, other: &MappingConfig) -> bool {
        self == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_side_iff_local_port_positive() {
        let mut m = sample_mapping();
        m.local_port = 0;
        assert!(!m.is_listener_side());
        m.local_port = 1234;
        assert!(m.is_listener_side());
    }

    #[test]
    fn client_config_builder_requires_token_unless_anonymous() {
        assert!(ClientConfig::builder()
            .server_address("gw:8080")
            .build()
            .is_err());
        assert!(ClientConfig::builder()
            .server_address("gw:8080")
            .anonymous("device-1")
            .build()
            .is_ok());
    }

    fn sample_mapping() -> MappingConfig {
        MappingConfig {
            mapping_id: "m1".into(),
            protocol: MappingProtocol::Tcp,
            local_port: 12345,
            target_host: "127.0.0.1".into(),
            target_port: 80,
            target_client_id: 2,
            secret_key: "secret".into(),
            enable_compression: false,
            compression_level: 0,
            enable_encryption: false,
            encryption_method: None,
            encryption_key: None,
            max_connections: None,
            bandwidth_limit: None,
        }
    }
}
