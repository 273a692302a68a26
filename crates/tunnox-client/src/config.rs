//! Runtime configuration for a client process: identity, server endpoint,
//! and the knobs that govern reconnect/heartbeat/auto-detection timing.
//! Mirrors the builder-with-validation shape the gateway client config
//! uses, with durations serialized as seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use tunnox_proto::ClientConfig;

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub client: ClientConfig,

    #[serde(with = "duration_secs", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    #[serde(with = "duration_secs", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,

    #[serde(with = "duration_secs", default = "default_command_timeout")]
    pub command_timeout: Duration,

    pub max_reconnect_attempts: u32,

    #[serde(with = "duration_secs", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,

    #[serde(with = "duration_secs", default = "default_max_reconnect_delay")]
    pub max_reconnect_delay: Duration,

    /// Off by default: pooled tunnel connections carry per-flow state, so
    /// reuse is only safe when the caller treats every take as a fresh
    /// flow (spec.md §4.13).
    pub enable_tunnel_pool: bool,

    /// CIDR networks the target-side handler may dial. Empty means
    /// unrestricted.
    #[serde(default)]
    pub target_allowlist_networks: Vec<String>,

    /// Ports the target-side handler may dial. Empty means unrestricted.
    #[serde(default)]
    pub target_allowlist_ports: Vec<u16>,
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_reconnect_delay() -> Duration {
    Duration::from_secs(1)
}
fn default_max_reconnect_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig {
                client_id: None,
                auth_token: String::new(),
                device_id: None,
                anonymous: false,
                server_address: String::new(),
                server_protocol: None,
            },
            heartbeat_interval: default_heartbeat_interval(),
            handshake_timeout: default_handshake_timeout(),
            command_timeout: default_command_timeout(),
            max_reconnect_attempts: 5,
            reconnect_delay: default_reconnect_delay(),
            max_reconnect_delay: default_max_reconnect_delay(),
            enable_tunnel_pool: false,
            target_allowlist_networks: Vec::new(),
            target_allowlist_ports: Vec::new(),
        }
    }
}

pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
        }
    }

    /// Seed a builder from a YAML `RunConfig` document on disk. CLI flags
    /// applied after this take precedence over whatever the file set, since
    /// every builder method just overwrites the relevant field.
    pub fn from_file(path: &std::path::Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| format!("reading {}: {e}", path.display()))?;
        let config: RunConfig =
            serde_yaml::from_str(&raw).map_err(|e| format!("parsing {}: {e}", path.display()))?;
        Ok(Self { config })
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.client.auth_token = token.into();
        self
    }

    pub fn anonymous(mut self, device_id: impl Into<String>) -> Self {
        self.config.client.anonymous = true;
        self.config.client.device_id = Some(device_id.into());
        self
    }

    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.config.client.server_address = address.into();
        self
    }

    pub fn server_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.config.client.server_protocol = Some(protocol.into());
        self
    }

    pub fn max_reconnect_attempts(mut self, n: u32) -> Self {
        self.config.max_reconnect_attempts = n;
        self
    }

    pub fn enable_tunnel_pool(mut self, enabled: bool) -> Self {
        self.config.enable_tunnel_pool = enabled;
        self
    }

    pub fn target_allowlist_networks(mut self, networks: Vec<String>) -> Self {
        self.config.target_allowlist_networks = networks;
        self
    }

    pub fn target_allowlist_ports(mut self, ports: Vec<u16>) -> Self {
        self.config.target_allowlist_ports = ports;
        self
    }

    pub fn build(self) -> Result<RunConfig, String> {
        if self.config.client.server_address.is_empty() {
            return Err("server_address is required".into());
        }
        if !self.config.client.anonymous && self.config.client.auth_token.is_empty() {
            return Err("auth_token is required unless anonymous".into());
        }
        crate::allowlist::Allowlist::new(
            self.config.target_allowlist_networks.clone(),
            self.config.target_allowlist_ports.clone(),
        )?;
        Ok(self.config)
    }
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_server_address() {
        let err = RunConfigBuilder::new().auth_token("t").build().unwrap_err();
        assert!(err.contains("server_address"));
    }

    #[test]
    fn builder_requires_token_unless_anonymous() {
        let err = RunConfigBuilder::new()
            .server_address("gw.example.com:8080")
            .build()
            .unwrap_err();
        assert!(err.contains("auth_token"));
    }

    #[test]
    fn anonymous_bypasses_token_requirement() {
        let cfg = RunConfigBuilder::new()
            .server_address("gw.example.com:8080")
            .anonymous("device-1")
            .build()
            .unwrap();
        assert!(cfg.client.anonymous);
    }

    #[test]
    fn builder_rejects_invalid_allowlist_cidr() {
        let err = RunConfigBuilder::new()
            .server_address("gw.example.com:8080")
            .anonymous("device-1")
            .target_allowlist_networks(vec!["not-a-cidr".into()])
            .build()
            .unwrap_err();
        assert!(err.contains("CIDR"));
    }
}
