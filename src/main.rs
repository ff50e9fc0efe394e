use axum::{
    Router,
    extract::Extension,
    routing::{delete, get, post},
};
use clap::Parser;
use cluster_coordination::cluster::handlers::*;
use cluster_coordination::cluster::protocol::*;
use cluster_coordination::cluster::registry::InMemoryNodeRegistry;
use cluster_coordination::cluster::service::NodeLifecycleManager;
use cluster_coordination::config::NodeConfig;
use cluster_coordination::scheduler::LocalScheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Cluster node: registers itself, keeps its registration honest and serves
/// the node administration API.
///
/// The binary keeps node records in memory and is meant as a single-process
/// demo of the lifecycle.
#[derive(Debug, Parser)]
#[command(name = "cluster-node", version, about)]
struct Cli {
    /// Node identifier, unique among live nodes
    #[arg(long, env = "NODE_ID", default_value = "node-1")]
    id: String,

    /// Address published in the node record
    #[arg(long, env = "NODE_ADDRESS", default_value = "127.0.0.1")]
    address: String,

    /// Port of the administration API
    #[arg(long, env = "NODE_MANAGEMENT_PORT", default_value_t = 6000)]
    management_port: u16,

    /// Allow other nodes to run next to this one
    #[arg(long, env = "NODE_CLUSTERED")]
    clustered: bool,

    /// Check-in age after which a node is presumed dead (e.g. "30s")
    #[arg(
        long,
        env = "NODE_LIVENESS_WINDOW",
        value_parser = humantime::parse_duration,
        default_value = "30s"
    )]
    liveness_window: Duration,

    /// Period of the heartbeat / verify / topology cycle
    #[arg(
        long,
        env = "NODE_HEARTBEAT_INTERVAL",
        value_parser = humantime::parse_duration,
        default_value = "10s"
    )]
    heartbeat_interval: Duration,

    /// Upper bound for one check cycle
    #[arg(
        long,
        env = "NODE_CHECK_TIMEOUT",
        value_parser = humantime::parse_duration,
        default_value = "5s"
    )]
    check_timeout: Duration,

    /// How long dead node records are kept before cleanup
    #[arg(
        long,
        env = "NODE_DEAD_RETENTION",
        value_parser = humantime::parse_duration,
        default_value = "24h"
    )]
    dead_node_retention: Duration,
}

impl From<Cli> for NodeConfig {
    fn from(cli: Cli) -> Self {
        NodeConfig {
            identifier: cli.id,
            address: cli.address,
            management_port: cli.management_port,
            clustered: cli.clustered,
            liveness_window: cli.liveness_window,
            heartbeat_interval: cli.heartbeat_interval,
            check_timeout: cli.check_timeout,
            dead_node_retention: cli.dead_node_retention,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config: NodeConfig = Cli::parse().into();
    let http_addr: SocketAddr = format!("{}:{}", config.address, config.management_port).parse()?;

    tracing::info!("Starting node '{}' on {}", config.identifier, http_addr);

    // 1. Node lifecycle:
    // Single-process wiring: the in-memory registry lives and dies with this
    // process, so nodes started separately never see each other. A shared
    // store plugs in as another `NodeRegistry` implementation handed to
    // `NodeLifecycleManager::new`.
    let registry = InMemoryNodeRegistry::new();
    if config.clustered {
        tracing::warn!("Clustered mode with a process-local registry; peers will not be visible");
    }
    let scheduler = Arc::new(LocalScheduler::new());
    let manager = NodeLifecycleManager::new(config, registry, scheduler);

    // A failed registration keeps the process up so the condition can be inspected.
    match manager.register_at_startup().await {
        Ok(record) => tracing::info!("Registered as {} ({})", record.identifier, record.oid),
        Err(e) => tracing::error!("Registration failed, node stays degraded: {}", e),
    }

    // 2. Check timer:
    let shutdown = CancellationToken::new();
    let timer = manager.clone().start(shutdown.clone());

    // 3. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_NODES, get(handle_list_nodes))
        .route(ENDPOINT_NODE, delete(handle_delete_node))
        .route(ENDPOINT_NODE_STATUS, get(handle_node_status))
        .route(ENDPOINT_FORCE_HEARTBEAT, post(handle_force_heartbeat))
        .route(ENDPOINT_CLEANUP, post(handle_cleanup_dead_nodes))
        .layer(Extension(manager.clone()));

    // 4. Start HTTP server:
    tracing::info!("Administration API listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    // 5. Shutdown:
    shutdown.cancel();
    if let Err(e) = timer.await {
        tracing::warn!("Check timer ended abnormally: {}", e);
    }
    manager.record_shutdown().await;

    tracing::info!("Node stopped");
    Ok(())
}
