//! Server-pushed notifications carried by `NotifyClient` commands.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    SystemMessage,
    QuotaWarning,
    QuotaExhausted,
    MappingCreated,
    MappingUpdated,
    MappingDeleted,
    MappingExpired,
    MappingActivated,
    TunnelClosed,
    TunnelOpened,
    TunnelError,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientNotification {
    pub notify_id: String,
    #[serde(rename = "type")]
    pub notify_type: NotificationType,
    /// Type-specific payload, carried as a JSON string per the wire format.
    pub payload: String,
    #[serde(default)]
    pub sender_client_id: Option<i64>,
    #[serde(default)]
    pub priority: u8,
    /// Unix timestamp (seconds); notifications past this are dropped unread.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub require_ack: bool,
}

impl ClientNotification {
    /// `true` once `now_unix` has passed `expires_at` (notifications with
    /// no expiry never expire).
    pub fn is_expired(&self, now_unix: i64) -> bool {
        matches!(self.expires_at, Some(exp) if now_unix > exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(expires_at: Option<i64>) -> ClientNotification {
        ClientNotification {
            notify_id: "n1".into(),
            notify_type: NotificationType::SystemMessage,
            payload: "{}".into(),
            sender_client_id: None,
            priority: 0,
            expires_at,
            require_ack: false,
        }
    }

    #[test]
    fn notification_without_expiry_never_expires() {
        assert!(!sample(None).is_expired(i64::MAX));
    }

    #[test]
    fn notification_past_expiry_is_expired() {
        assert!(sample(Some(100)).is_expired(101));
        assert!(!sample(Some(100)).is_expired(99));
    }
}
