//! Typed fan-out of server-pushed notifications (spec.md §4.7). The
//! handler list is copy-on-read during dispatch so handlers can be
//! (un)registered concurrently with an in-flight dispatch.

use std::sync::{Arc, RwLock};

use tracing::warn;

use tunnox_proto::{ClientNotification, NotificationType};

/// Typed callback set a registered handler may implement. Default methods
/// are no-ops so a handler only needs to override what it cares about.
pub trait NotificationHandler: Send + Sync {
    fn on_system_message(&self, _n: &ClientNotification) {}
    fn on_quota_warning(&self, _n: &ClientNotification) {}
    fn on_quota_exhausted(&self, _n: &ClientNotification) {}
    fn on_mapping_event(&self, _n: &ClientNotification) {}
    fn on_tunnel_opened(&self, _n: &ClientNotification) {}
    fn on_tunnel_closed(&self, _n: &ClientNotification) {}
    fn on_tunnel_error(&self, _n: &ClientNotification) {}
    fn on_custom_notification(&self, _n: &ClientNotification) {}
    /// Fallback for any type not covered by a more specific callback
    /// above, including types the dispatcher doesn't recognize yet.
    fn on_generic_notification(&self, _n: &ClientNotification) {}
}

#[derive(Default)]
pub struct NotificationDispatcher {
    handlers: RwLock<Vec<Arc<dyn NotificationHandler>>>,
    now_unix: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            now_unix: Box::new(|| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0)
            }),
        }
    }

    pub fn register(&self, handler: Arc<dyn NotificationHandler>) {
        self.handlers.write().unwrap().push(handler);
    }

    /// Returns true if the notification additionally requires an ack to be
    /// sent back to the server after dispatch.
    pub fn dispatch(&self, n: &ClientNotification) -> bool {
        let now = (self.now_unix)();
        if n.is_expired(now) {
            warn!(notify_id = %n.notify_id, "dropping expired notification");
            return false;
        }

        let handlers = self.handlers.read().unwrap().clone();
        for handler in &handlers {
            match n.notify_type {
                NotificationType::SystemMessage => handler.on_system_message(n),
                NotificationType::QuotaWarning => handler.on_quota_warning(n),
                NotificationType::QuotaExhausted => handler.on_quota_exhausted(n),
                NotificationType::MappingCreated
                | NotificationType::MappingUpdated
                | NotificationType::MappingDeleted
                | NotificationType::MappingExpired
                | NotificationType::MappingActivated => handler.on_mapping_event(n),
                NotificationType::TunnelOpened => handler.on_tunnel_opened(n),
                NotificationType::TunnelClosed => handler.on_tunnel_closed(n),
                NotificationType::TunnelError => handler.on_tunnel_error(n),
                NotificationType::Custom => handler.on_custom_notification(n),
            }
            handler.on_generic_notification(n);
        }

        n.require_ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        mapping_events: AtomicUsize,
    }

    impl NotificationHandler for CountingHandler {
        fn on_mapping_event(&self, _n: &ClientNotification) {
            self.mapping_events.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn notification(notify_type: NotificationType, expires_at: Option<i64>) -> ClientNotification {
        ClientNotification {
            notify_id: "n1".into(),
            notify_type,
            payload: "{}".into(),
            sender_client_id: None,
            priority: 0,
            expires_at,
            require_ack: false,
        }
    }

    #[test]
    fn dispatches_mapping_events_to_mapping_handler() {
        let dispatcher = NotificationDispatcher::new();
        let handler = Arc::new(CountingHandler {
            mapping_events: AtomicUsize::new(0),
        });
        dispatcher.register(handler.clone());
        dispatcher.dispatch(&notification(NotificationType::MappingCreated, None));
        assert_eq!(handler.mapping_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_notification_is_dropped() {
        let dispatcher = NotificationDispatcher::new();
        let handler = Arc::new(CountingHandler {
            mapping_events: AtomicUsize::new(0),
        });
        dispatcher.register(handler.clone());
        dispatcher.dispatch(&notification(NotificationType::MappingCreated, Some(1)));
        assert_eq!(handler.mapping_events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn require_ack_is_reported_back_to_caller() {
        let dispatcher = NotificationDispatcher::new();
        let mut n = notification(NotificationType::SystemMessage, None);
        n.require_ack = true;
        assert!(dispatcher.dispatch(&n));
    }
}
