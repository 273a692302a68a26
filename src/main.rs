//! tunnox client CLI: connects to a gateway's control channel and serves
//! whatever mappings the server pushes via `ConfigSet` (spec.md §1, §6).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tunnox_client::control::ExitSignal;
use tunnox_client::notification::NotificationHandler;
use tunnox_client::{NotificationDispatcher, RunConfigBuilder, TunnoxClient};
use tunnox_proto::ClientDefaults;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")",
);

#[derive(Parser, Debug)]
#[command(name = "tunnox-client")]
#[command(about = "Connect a local machine to a tunnox gateway and serve its pushed mappings")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// YAML file holding a full `RunConfig`. CLI flags override whatever
    /// the file sets.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Gateway control endpoint. Interpreted per `--protocol`, or dialed
    /// with auto-detection across websocket/quic/tcp/kcp if omitted. Required
    /// unless `--config` supplies `client.server_address`.
    #[arg(long, env = "TUNNOX_SERVER")]
    server: Option<String>,

    /// Explicit transport: websocket, quic, tcp, kcp, or http_poll. Leave
    /// unset to auto-detect (spec.md §4.6).
    #[arg(long, env = "TUNNOX_PROTOCOL")]
    protocol: Option<String>,

    /// Bearer token. Required unless `--anonymous` is set.
    #[arg(long, env = "TUNNOX_TOKEN")]
    token: Option<String>,

    /// Register anonymously using this device id instead of a token.
    #[arg(long, env = "TUNNOX_DEVICE_ID")]
    anonymous: Option<String>,

    /// Previously assigned client id, if reconnecting as a known client.
    #[arg(long, env = "TUNNOX_CLIENT_ID")]
    client_id: Option<i64>,

    /// Maximum reconnect attempts before giving up (spec.md §4.6).
    #[arg(long, default_value = "10")]
    max_reconnect_attempts: u32,

    /// Enable the per-mapping tunnel pool (spec.md §4.13). Off by default.
    #[arg(long)]
    enable_tunnel_pool: bool,

    /// CIDR networks the target-side handler may dial (repeatable). Empty
    /// means unrestricted.
    #[arg(long = "allow-network")]
    allow_network: Vec<String>,

    /// Ports the target-side handler may dial (repeatable). Empty means
    /// unrestricted.
    #[arg(long = "allow-port")]
    allow_port: Vec<u16>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

struct LoggingNotificationHandler;

impl NotificationHandler for LoggingNotificationHandler {
    fn on_quota_warning(&self, n: &tunnox_proto::ClientNotification) {
        warn!(notify_id = %n.notify_id, "quota warning: {}", n.payload);
    }

    fn on_quota_exhausted(&self, n: &tunnox_proto::ClientNotification) {
        warn!(notify_id = %n.notify_id, "quota exhausted: {}", n.payload);
    }

    fn on_tunnel_error(&self, n: &tunnox_proto::ClientNotification) {
        warn!(notify_id = %n.notify_id, "tunnel error: {}", n.payload);
    }

    fn on_generic_notification(&self, n: &tunnox_proto::ClientNotification) {
        info!(notify_id = %n.notify_id, notify_type = ?n.notify_type, "notification received");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut builder = match &cli.config {
        Some(path) => RunConfigBuilder::from_file(path).map_err(anyhow::Error::msg).context("loading --config")?,
        None => RunConfigBuilder::new(),
    };

    if let Some(server) = &cli.server {
        builder = builder.server_address(server.clone());
    }
    builder = builder
        .max_reconnect_attempts(cli.max_reconnect_attempts)
        .enable_tunnel_pool(cli.enable_tunnel_pool);
    if !cli.allow_network.is_empty() {
        builder = builder.target_allowlist_networks(cli.allow_network.clone());
    }
    if !cli.allow_port.is_empty() {
        builder = builder.target_allowlist_ports(cli.allow_port.clone());
    }

    builder = match (&cli.token, &cli.anonymous) {
        (_, Some(device_id)) => builder.anonymous(device_id.clone()),
        (Some(token), None) => builder.auth_token(token.clone()),
        (None, None) if cli.config.is_some() => builder,
        (None, None) => anyhow::bail!("either --token or --anonymous is required"),
    };
    if let Some(protocol) = &cli.protocol {
        builder = builder.server_protocol(protocol.clone());
    }

    let mut config = builder.build().map_err(anyhow::Error::msg).context("invalid configuration")?;
    if cli.client_id.is_some() {
        config.client.client_id = cli.client_id;
    }

    let notifications = Arc::new(NotificationDispatcher::new());
    notifications.register(Arc::new(LoggingNotificationHandler));

    let client = TunnoxClient::new(config, ClientDefaults::default(), notifications);

    info!(server = %config.client.server_address, "tunnox client starting");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("received Ctrl+C, shutting down");
            Ok(())
        }
        result = client.run() => {
            match result {
                Ok(ExitSignal::Kicked) => {
                    info!("kicked by server");
                    Ok(())
                }
                Ok(ExitSignal::AuthFailed) => {
                    error!("authentication failed");
                    anyhow::bail!("authentication failed")
                }
                Ok(ExitSignal::CredentialsReset) => {
                    error!("credentials were reset by the server");
                    anyhow::bail!("credentials reset")
                }
                Ok(ExitSignal::ReconnectExhausted) => {
                    error!("reconnect attempts exhausted");
                    anyhow::bail!("reconnect attempts exhausted")
                }
                Err(e) => {
                    error!("client exited with error: {e}");
                    Err(e.into())
                }
            }
        }
    }
}
