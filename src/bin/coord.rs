//! Coordinator binary

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tinysns::common::{Config, LockStoreKind};
use tinysns::Coordinator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tinysns-coord")]
#[command(about = "tinysns coordinator: leader election, liveness and client routing")]
#[command(version)]
struct Cli {
    /// Configuration file (toml, extension optional)
    #[arg(long, default_value = "tinysns")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Bind address for gRPC
        #[arg(long)]
        grpc: Option<SocketAddr>,

        /// Bind address for the admin HTTP API
        #[arg(long)]
        http: Option<SocketAddr>,

        /// Number of clusters
        #[arg(long)]
        clusters: Option<usize>,

        /// Heartbeat delay after which a node counts a miss (ms)
        #[arg(long)]
        max_heartbeat_delay_ms: Option<u64>,

        /// Persist election locks under this directory instead of memory
        #[arg(long)]
        lock_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file, then override with CLI arguments
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

    match cli.command {
        Commands::Serve {
            grpc,
            http,
            clusters,
            max_heartbeat_delay_ms,
            lock_dir,
        } => {
            let mut coord_config = config.coordinator.unwrap_or_default();
            if let Some(grpc) = grpc {
                coord_config.grpc_addr = grpc;
            }
            if let Some(http) = http {
                coord_config.http_addr = http;
            }
            if let Some(clusters) = clusters {
                coord_config.num_clusters = clusters;
            }
            if let Some(delay) = max_heartbeat_delay_ms {
                coord_config.max_heartbeat_delay_ms = delay;
            }
            if let Some(dir) = lock_dir {
                coord_config.lock_store = LockStoreKind::Disk;
                coord_config.lock_dir = dir;
            }

            Coordinator::new(coord_config).serve().await?;
        }
    }

    Ok(())
}
