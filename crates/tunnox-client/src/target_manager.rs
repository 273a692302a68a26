//! Registry of in-flight target-side tunnels (spec.md §4.14): maps a
//! `tunnel_id` to the cancellation handle for its forwarding task, so a
//! shutdown or a server-initiated close can tear one down without waiting
//! for its own EOF.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct TargetTunnelManager {
    tunnels: Mutex<HashMap<String, CancellationToken>>,
}

impl TargetTunnelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tunnel and return the token its forwarding loop
    /// should race against. Replaces (and cancels) any stale entry left
    /// behind under the same id.
    pub fn register(&self, tunnel_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        let mut tunnels = self.tunnels.lock().unwrap();
        if let Some(old) = tunnels.insert(tunnel_id.to_string(), token.clone()) {
            old.cancel();
        }
        token
    }

    /// Mark a tunnel as finished, dropping its entry without cancelling
    /// (the forwarding loop already reached its own natural end).
    pub fn close_tunnel(&self, tunnel_id: &str) {
        self.tunnels.lock().unwrap().remove(tunnel_id);
    }

    /// Cancel and drop every registered tunnel, used on shutdown.
    pub fn close_all(&self) {
        for (_, token) in self.tunnels.lock().unwrap().drain() {
            token.cancel();
        }
    }

    pub fn active_count(&self) -> usize {
        self.tunnels.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_twice_under_the_same_id_cancels_the_stale_token() {
        let manager = TargetTunnelManager::new();
        let first = manager.register("t1");
        let _second = manager.register("t1");
        assert!(first.is_cancelled());
    }

    #[test]
    fn close_all_cancels_every_outstanding_tunnel() {
        let manager = TargetTunnelManager::new();
        let a = manager.register("a");
        let b = manager.register("b");
        manager.close_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert_eq!(manager.active_count(), 0);
    }
}
