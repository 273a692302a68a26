//! Reverse-tunnel client: a control channel to a gateway, a mapping
//! manager that opens local listeners per server-pushed rule, and a
//! target-side handler that dials out to real services on demand
//! (spec.md §1).

pub mod allowlist;
pub mod command;
pub mod config;
pub mod control;
pub mod error;
pub mod mapping;
pub mod notification;
pub mod packet_stream;
pub mod pool;
pub mod quota;
pub mod socks5;
pub mod target;
pub mod target_manager;
pub mod transform;
pub mod tunnel;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use allowlist::Allowlist;
pub use command::CommandResponseManager;
pub use config::{RunConfig, RunConfigBuilder};
pub use control::{ControlClient, ControlTransport, ExitSignal};
pub use error::{ClientError, ClientResult};
pub use mapping::MappingManager;
pub use notification::{NotificationDispatcher, NotificationHandler};
pub use pool::TunnelPool;
pub use quota::{NoopQuotaChecker, QuotaChecker};
pub use target_manager::TargetTunnelManager;

use tunnox_proto::ClientDefaults;

/// Everything needed to run one client process. Construct once, then call
/// `run()` to connect and drive the control channel until it exits.
pub struct TunnoxClient {
    control: Arc<ControlClient>,
    mapping: Arc<MappingManager>,
    targets: Arc<TargetTunnelManager>,
    pool: Option<Arc<TunnelPool>>,
}

impl TunnoxClient {
    /// Build the client and spawn its background workers (mapping
    /// reconciliation, target-side tunnel handling, and the tunnel pool's
    /// maintenance loop if enabled). Must be called from within a Tokio
    /// runtime.
    pub fn new(config: RunConfig, defaults: ClientDefaults, notifications: Arc<NotificationDispatcher>) -> Self {
        let (config_set_tx, config_set_rx) = mpsc::unbounded_channel();
        let (tunnel_open_tx, tunnel_open_rx) = mpsc::unbounded_channel();
        let enable_pool = config.enable_tunnel_pool;
        let allowlist = Arc::new(
            Allowlist::new(
                config.target_allowlist_networks.clone(),
                config.target_allowlist_ports.clone(),
            )
            .expect("allowlist was validated by RunConfigBuilder::build"),
        );

        let control = ControlClient::new(config, defaults, notifications, config_set_tx, tunnel_open_tx);
        let pool = enable_pool.then(|| TunnelPool::new(control.clone()));
        let mapping = MappingManager::new(control.clone(), pool.clone(), Arc::new(NoopQuotaChecker));
        let targets = Arc::new(TargetTunnelManager::new());

        let mapping_task = mapping.clone();
        tokio::spawn(async move {
            mapping_task.run(config_set_rx).await;
        });

        let control_for_targets = control.clone();
        let targets_for_task = targets.clone();
        tokio::spawn(async move {
            target::run(control_for_targets, targets_for_task, allowlist, tunnel_open_rx).await;
        });

        if let Some(pool) = pool.clone() {
            tokio::spawn(async move {
                pool.maintain().await;
            });
        }

        Self {
            control,
            mapping,
            targets,
            pool,
        }
    }

    pub fn control(&self) -> Arc<ControlClient> {
        self.control.clone()
    }

    pub fn mapping(&self) -> Arc<MappingManager> {
        self.mapping.clone()
    }

    pub fn targets(&self) -> Arc<TargetTunnelManager> {
        self.targets.clone()
    }

    pub fn pool(&self) -> Option<Arc<TunnelPool>> {
        self.pool.clone()
    }

    /// Connect the control channel and run until it exits (kicked, auth
    /// failure, or reconnect attempts exhausted).
    pub async fn run(&self) -> ClientResult<ExitSignal> {
        self.control.connect().await?;
        Ok(self.control.clone().run().await)
    }
}
