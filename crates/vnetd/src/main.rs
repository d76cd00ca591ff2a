//! vnetd entry point.
//!
//! Wires the orchestration modules together and runs the daemon event
//! loop. Without a SAI adapter linked in, the daemon runs against the
//! in-memory mock switch (simulation mode), which exercises the full
//! control-plane logic without touching hardware.

use clap::Parser;
use log::{info, warn};
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};
use vnetd::daemon::{OrchDaemon, OrchDaemonConfig};
use vnetd::intfs::{IntfsOrch, IntfsOrchConfig, IntfsOrchHandle};
use vnetd::vnet::{VnetOrch, VnetOrchConfig, VnetOrchHandle, VnetRouteOrch, VnetRouteOrchConfig};
use vnetd::vxlan::{VxlanTunnelOrch, VxlanTunnelOrchHandle};
use vnetd::{MockSwitchApi, SwitchApi};

/// VNET overlay orchestration daemon.
#[derive(Parser, Debug)]
#[command(name = "vnetd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Batch size for consumer table operations
    #[arg(short = 'b', long, default_value = "128")]
    batch_size: usize,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "1000")]
    heartbeat_interval: u64,

    /// Passes a deferred event survives before it is dropped
    #[arg(long, default_value = "128")]
    max_defer_passes: u32,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // tracing carries the structured audit records; with no subscriber
    // installed they are forwarded to the log facade and land here.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("starting vnetd (simulation mode, mock switch)");
    info!("batch size: {}", args.batch_size);
    info!("heartbeat interval: {}ms", args.heartbeat_interval);
    info!("deferred-event retry limit: {} passes", args.max_defer_passes);

    let sai: Arc<dyn SwitchApi> = Arc::new(MockSwitchApi::new());

    let tunnel_orch = Arc::new(RwLock::new(VxlanTunnelOrch::new(sai.clone())));
    let intfs_orch = Arc::new(RwLock::new(IntfsOrch::new(
        IntfsOrchConfig::default(),
        sai.clone(),
    )));
    let vnet_orch = Arc::new(RwLock::new(VnetOrch::new(
        VnetOrchConfig {
            max_defer_passes: args.max_defer_passes,
            ..VnetOrchConfig::default()
        },
        sai.clone(),
        tunnel_orch.clone(),
    )));
    let route_orch = VnetRouteOrch::new(
        VnetRouteOrchConfig {
            max_defer_passes: args.max_defer_passes,
        },
        sai.clone(),
        vnet_orch.clone(),
        tunnel_orch.clone(),
        intfs_orch.clone(),
    );

    let mut daemon = OrchDaemon::new(OrchDaemonConfig {
        heartbeat_interval_ms: args.heartbeat_interval,
        batch_size: args.batch_size,
    });

    // Priority order mirrors the dependency chain: interfaces, tunnels,
    // VNET definitions, then routes.
    daemon.register_orch(Box::new(IntfsOrchHandle(intfs_orch)));
    daemon.register_orch(Box::new(VxlanTunnelOrchHandle(tunnel_orch)));
    daemon.register_orch(Box::new(VnetOrchHandle(vnet_orch)));
    daemon.register_orch(Box::new(route_orch));

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received SIGINT, shutting down");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    daemon.run().await;

    info!("vnetd shutdown complete");
}
