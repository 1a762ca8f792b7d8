//! Replica server binary

use clap::Parser;
use std::path::PathBuf;
use tinysns::common::Config;
use tinysns::ReplicaServer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tinysns-server")]
#[command(about = "tinysns replica server")]
#[command(version)]
struct Cli {
    /// Configuration file (toml, extension optional)
    #[arg(long, default_value = "tinysns")]
    config: PathBuf,

    /// Cluster ID (1-based)
    #[arg(long = "cluster", short = 'c')]
    cluster_id: Option<i32>,

    /// Server ID within the cluster
    #[arg(long = "server", short = 's')]
    server_id: Option<i32>,

    /// Hostname advertised to the coordinator
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long, short = 'p')]
    port: Option<u16>,

    /// Coordinator gRPC address
    #[arg(long)]
    coordinator: Option<String>,

    /// Data directory (logs go to <data-dir>/c<cluster>s<server>)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Stop propagating as master this long after the last confirming
    /// heartbeat (ms)
    #[arg(long)]
    master_lease_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(&cli.config).unwrap_or_else(|e| {
        eprintln!("Ignoring configuration {}: {}", cli.config.display(), e);
        Config::default()
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut node_config = config.node.unwrap_or_default();
    if let Some(cluster_id) = cli.cluster_id {
        node_config.cluster_id = cluster_id;
    }
    if let Some(server_id) = cli.server_id {
        node_config.server_id = server_id;
    }
    if let Some(host) = cli.host {
        node_config.host = host;
    }
    if let Some(port) = cli.port {
        node_config.port = port;
    }
    if let Some(coordinator) = cli.coordinator {
        node_config.coordinator_addr = coordinator;
    }
    if let Some(data_dir) = cli.data_dir {
        node_config.data_dir = data_dir;
    }
    if cli.master_lease_ms.is_some() {
        node_config.master_lease_ms = cli.master_lease_ms;
    }

    ReplicaServer::new(node_config).serve().await?;
    Ok(())
}
