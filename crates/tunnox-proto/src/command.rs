//! Command envelope carried inside `JsonCommand` / `CommandResp` packet
//! bodies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of command types the control channel exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    ConfigSet,
    ConfigGet,
    TunnelOpenRequestCmd,
    KickClient,
    NotifyClient,
    NotifyClientAck,
    HttpProxyRequest,
    HttpProxyResponse,
    DnsResolve,
    DnsQuery,
    ConnectionCodeGenerate,
    ConnectionCodeList,
    ConnectionCodeActivate,
    MappingList,
    MappingGet,
    MappingDelete,
    HttpDomainGetBaseDomains,
    HttpDomainCheckSubdomain,
    HttpDomainGenSubdomain,
    HttpDomainCreate,
    HttpDomainList,
    HttpDomainDelete,
    SendNotifyToClient,
}

/// Request envelope: `{"command_type":…, "command_id":"…", "command_body":"…json…"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPacket {
    pub command_type: CommandType,
    pub command_id: String,
    pub command_body: Value,
}

impl CommandPacket {
    pub fn new(command_type: CommandType, command_body: Value) -> Self {
        Self {
            command_type,
            command_id: uuid::Uuid::new_v4().to_string(),
            command_body,
        }
    }
}

/// Response envelope: `{"success":bool, "data":…, "error":"…", "command_id":"…", "request_id":"…"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub command_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Convenience wrapper bundling a typed request with its matching response,
/// used by the command request/response manager's channel registry.
#[derive(Debug)]
pub struct CommandEnvelope {
    pub request: CommandPacket,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_type_round_trips_through_json() {
        let v = serde_json::to_value(CommandType::TunnelOpenRequestCmd).unwrap();
        assert_eq!(v, serde_json::json!("tunnel_open_request_cmd"));
        let back: CommandType = serde_json::from_value(v).unwrap();
        assert_eq!(back, CommandType::TunnelOpenRequestCmd);
    }

    #[test]
    fn command_ids_are_generated_unique() {
        let a = CommandPacket::new(CommandType::ConfigGet, serde_json::json!({}));
        let b = CommandPacket::new(CommandType::ConfigGet, serde_json::json!({}));
        assert_ne!(a.command_id, b.command_id);
    }

    #[test]
    fn response_envelope_deserializes_string_or_object_data() {
        let raw = serde_json::json!({
            "success": true,
            "data": "plain string",
            "command_id": "abc",
        });
        let resp: CommandResponse = serde_json::from_value(raw).unwrap();
        assert!(resp.success);
        assert_eq!(resp.data.unwrap(), serde_json::json!("plain string"));
    }
}
