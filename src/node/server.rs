//! Replica node server

use crate::common::{Error, NodeConfig, Result};
use crate::node::coord_client::CoordinatorClient;
use crate::node::grpc::SnsGrpcService;
use crate::node::journal::Journal;
use crate::node::peer_client::PeerClient;
use crate::node::replication::Propagator;
use crate::node::role::{send_heartbeats, RoleState};
use crate::node::store::SocialStore;
use crate::proto::ServerInfo;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;

/// Kind reported to the coordinator for replica nodes
pub const SERVER_KIND: &str = "SERVER";

/// Aborts the heartbeat task when the serve loop is dropped or returns.
struct HeartbeatTask(JoinHandle<Result<()>>);

impl Drop for HeartbeatTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct ReplicaServer {
    config: NodeConfig,
}

impl ReplicaServer {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Bind the configured address and serve until an error occurs.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        self.run(listener).await
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            server_id: self.config.server_id,
            cluster_id: self.config.cluster_id,
            hostname: self.config.host.clone(),
            port: self.config.port.to_string(),
            r#type: SERVER_KIND.to_string(),
            registered: false,
            changed: false,
        }
    }

    /// Register, sync state, then serve on a pre-bound listener.
    ///
    /// Returns an error if registration or bootstrap fails, or as soon as a
    /// heartbeat to the coordinator fails.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        self.config.validate()?;

        tracing::info!(
            "Starting replica server {} of cluster {}",
            self.config.server_id,
            self.config.cluster_id
        );
        tracing::info!("  gRPC API: {}", listener.local_addr()?);
        tracing::info!("  Advertised: {}", self.config.address());
        tracing::info!("  Coordinator: {}", self.config.coordinator_addr);
        tracing::info!("  Data path: {}", self.config.node_dir().display());

        let coordinator = CoordinatorClient::connect(
            &self.config.coordinator_addr,
            self.config.connect_timeout(),
            self.config.rpc_timeout(),
        )
        .await?;

        // Register
        let role = Arc::new(RoleState::new(self.config.master_lease()));
        let mut info = self.server_info();
        let path = coordinator.heartbeat(&info).await.map_err(|e| match e {
            Error::Grpc(status) if status.code() == tonic::Code::AlreadyExists => {
                Error::RejectedRegistration {
                    cluster_id: info.cluster_id,
                    server_id: info.server_id,
                }
            }
            other => other,
        })?;
        role.apply(&path, Instant::now());
        info.registered = true;
        tracing::info!(
            "Server registered with file lock {}. Server is {}",
            path.path,
            role.role()
        );

        // Initialize store
        let journal = Journal::open(self.config.node_dir())?;
        let mut store = SocialStore::new(journal);
        self.bootstrap(&mut store, &path.sync_address).await?;
        let store = Arc::new(Mutex::new(store));

        let mut heartbeat = HeartbeatTask(tokio::spawn(send_heartbeats(
            coordinator.clone(),
            info.clone(),
            role.clone(),
            self.config.heartbeat_interval(),
        )));

        // Create gRPC server
        let propagator = Arc::new(Propagator::new(coordinator, info, role, &self.config));
        let grpc_service = SnsGrpcService::new(store, propagator, self.config.backlog_size);
        let grpc_server = tonic::transport::Server::builder()
            .add_service(grpc_service.into_server())
            .serve_with_incoming(TcpListenerStream::new(listener));

        tracing::info!("✓ Replica server ready");

        tokio::select! {
            res = grpc_server => {
                if let Err(e) = &res {
                    tracing::error!("gRPC server error: {}", e);
                }
                res.map_err(Error::from)
            }
            res = &mut heartbeat.0 => match res {
                Ok(res) => res,
                Err(e) => Err(Error::Internal(format!("heartbeat task failed: {}", e))),
            },
        }
    }

    /// Restore state from the local journal, or replace it with a
    /// sibling's when the coordinator names one to sync from.
    async fn bootstrap(&self, store: &mut SocialStore, sync_address: &str) -> Result<()> {
        if sync_address.is_empty() {
            store.restore_local()?;
            tracing::info!("Restored state from local journal");
            return Ok(());
        }

        tracing::info!("Syncing state from {}", sync_address);
        let mut peer = PeerClient::connect(
            sync_address,
            self.config.connect_timeout(),
            self.config.rpc_timeout(),
        )
        .await
        .map_err(|e| Error::BootstrapSync {
            addr: sync_address.to_string(),
            reason: e.to_string(),
        })?;

        let (relationships, posts) = peer.fetch_log(&self.config.address()).await?;
        store.restore_from(&relationships, &posts)?;
        tracing::info!("Synced state from {}", sync_address);
        Ok(())
    }
}
