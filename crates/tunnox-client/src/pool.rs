//! Optional per-mapping tunnel pool (spec.md §4.13): pre-dials spare
//! tunnels and idles them so an accepted local connection can grab an
//! already-handshaked tunnel instead of paying dial-plus-handshake latency
//! on the hot path. Off by default (`RunConfig.enable_tunnel_pool`).
//! `put()` re-admits a tunnel a caller decided not to consume, but the
//! mapping forwarding path in `mapping.rs` always drains a taken tunnel
//! through `bidirectional_copy` until EOF, so in practice nothing currently
//! calls it — it exists for callers with a shorter-lived borrow of a
//! pooled tunnel (e.g. a probe before committing to a full flow).
//!
//! The wire protocol's `ByteStream` abstraction spans TCP, QUIC, WebSocket,
//! KCP and HTTP long-poll behind one trait, none of which expose a
//! non-blocking peek primitive uniformly. Rather than downcast to guess the
//! concrete transport, idle tunnels here are validated by age alone
//! (`idle_timeout`) across every transport, not just a TCP-specific
//! 1ms peek read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use tunnox_proto::MappingConfig;

use crate::control::ControlClient;
use crate::error::ClientResult;
use crate::packet_stream::PacketStream;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_MAX_IDLE: usize = 4;

struct IdleTunnel {
    stream: PacketStream,
    parked_at: Instant,
}

struct MappingPool {
    cfg: MappingConfig,
    idle: Vec<IdleTunnel>,
    active: usize,
}

impl MappingPool {
    fn max_idle(&self) -> usize {
        self.cfg
            .max_connections
            .map(|n| (n as usize).min(DEFAULT_MAX_IDLE))
            .unwrap_or(DEFAULT_MAX_IDLE)
    }

    fn max_active(&self) -> usize {
        self.cfg.max_connections.map(|n| n as usize).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
}

/// Per-mapping tunnel pool, shared by every connection handler on a
/// client.
pub struct TunnelPool {
    control: Arc<ControlClient>,
    pools: Mutex<HashMap<String, MappingPool>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TunnelPool {
    pub fn new(control: Arc<ControlClient>) -> Arc<Self> {
        Arc::new(Self {
            control,
            pools: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Register a mapping with the pool so the maintenance loop starts
    /// pre-warming spares for it. Idempotent.
    pub async fn ensure_mapping(&self, cfg: &MappingConfig) {
        let mut pools = self.pools.lock().await;
        pools.entry(cfg.mapping_id.clone()).or_insert_with(|| MappingPool {
            cfg: cfg.clone(),
            idle: Vec::new(),
            active: 0,
        });
    }

    pub async fn forget_mapping(&self, mapping_id: &str) {
        self.pools.lock().await.remove(mapping_id);
    }

    /// Take a ready tunnel for `mapping_id`, preferring the most recently
    /// parked idle one (LIFO: warmest connection first). Falls back to
    /// dialing a fresh tunnel when the pool is empty or every idle entry is
    /// stale.
    pub async fn take(&self, cfg: &MappingConfig) -> ClientResult<PacketStream> {
        {
            let mut pools = self.pools.lock().await;
            let pool = pools.entry(cfg.mapping_id.clone()).or_insert_with(|| MappingPool {
                cfg: cfg.clone(),
                idle: Vec::new(),
                active: 0,
            });
            while let Some(candidate) = pool.idle.pop() {
                if candidate.parked_at.elapsed() <= IDLE_TIMEOUT {
                    if pool.active < pool.max_active() {
                        pool.active += 1;
                    }
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(candidate.stream);
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let tunnel_id = Uuid::new_v4().to_string();
        let stream = self
            .control
            .dial_tunnel(&cfg.mapping_id, &tunnel_id, &cfg.secret_key, None)
            .await?;

        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get_mut(&cfg.mapping_id) {
            pool.active += 1;
        }
        Ok(stream)
    }

    /// Tell the pool a tunnel taken earlier has finished its flow, freeing
    /// one active slot.
    pub async fn release_active(&self, mapping_id: &str) {
        if let Some(pool) = self.pools.lock().await.get_mut(mapping_id) {
            pool.active = pool.active.saturating_sub(1);
        }
    }

    /// Re-admit a tunnel to the idle tail instead of dropping it (spec.md
    /// §4.13). Only valid for connections that stayed within
    /// `IDLE_TIMEOUT`-worth of freshness and whose mapping is still
    /// registered and under `max_idle`; otherwise the tunnel is dropped and
    /// the active slot is simply freed.
    pub async fn put(&self, mapping_id: &str, stream: PacketStream, parked_at: Instant) {
        let mut pools = self.pools.lock().await;
        let Some(pool) = pools.get_mut(mapping_id) else {
            return;
        };
        pool.active = pool.active.saturating_sub(1);
        if is_still_admissible(parked_at, pool.idle.len(), pool.max_idle()) {
            pool.idle.push(IdleTunnel { stream, parked_at });
        }
    }

    pub async fn stats(&self, mapping_id: &str) -> PoolStats {
        self.pools
            .lock()
            .await
            .get(mapping_id)
            .map(|p| PoolStats {
                idle: p.idle.len(),
                active: p.active,
            })
            .unwrap_or_default()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Background loop: drop stale idle entries and top every registered
    /// mapping back up to its `max_idle` (spec.md §4.13). Runs for the life
    /// of the client; intended to be spawned once.
    pub async fn maintain(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            self.cleanup_and_refill().await;
        }
    }

    async fn cleanup_and_refill(&self) {
        let snapshot: Vec<(String, MappingConfig, usize)> = {
            let mut pools = self.pools.lock().await;
            for pool in pools.values_mut() {
                pool.idle.retain(|t| t.parked_at.elapsed() <= IDLE_TIMEOUT);
            }
            pools
                .iter()
                .map(|(id, p)| (id.clone(), p.cfg.clone(), p.idle.len()))
                .collect()
        };

        for (mapping_id, cfg, idle_len) in snapshot {
            let max_idle = self
                .pools
                .lock()
                .await
                .get(&mapping_id)
                .map(|p| p.max_idle())
                .unwrap_or(DEFAULT_MAX_IDLE);

            for _ in idle_len..max_idle {
                let tunnel_id = Uuid::new_v4().to_string();
                match self
                    .control
                    .dial_tunnel(&mapping_id, &tunnel_id, &cfg.secret_key, None)
                    .await
                {
                    Ok(stream) => {
                        let mut pools = self.pools.lock().await;
                        if let Some(pool) = pools.get_mut(&mapping_id) {
                            pool.idle.push(IdleTunnel {
                                stream,
                                parked_at: Instant::now(),
                            });
                        }
                    }
                    Err(e) => {
                        warn!(mapping_id = %mapping_id, "tunnel pool pre-warm dial failed: {e}");
                        break;
                    }
                }
            }
        }
    }
}

fn is_still_admissible(parked_at: Instant, idle_len: usize, max_idle: usize) -> bool {
    parked_at.elapsed() <= IDLE_TIMEOUT && idle_len < max_idle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tunnel_under_max_idle_is_admissible() {
        assert!(is_still_admissible(Instant::now(), 0, DEFAULT_MAX_IDLE));
    }

    #[test]
    fn full_idle_queue_rejects_readmission() {
        assert!(!is_still_admissible(Instant::now(), DEFAULT_MAX_IDLE, DEFAULT_MAX_IDLE));
    }

    #[test]
    fn stale_tunnel_is_rejected_even_with_room() {
        let parked_at = Instant::now() - (IDLE_TIMEOUT + Duration::from_secs(1));
        assert!(!is_still_admissible(parked_at, 0, DEFAULT_MAX_IDLE));
    }
}
