//! Coordinator server

use crate::common::{CoordinatorConfig, LockStoreKind, Result};
use crate::coordinator::grpc::CoordGrpcService;
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::lock_store::{DiskLockStore, LockStore, MemoryLockStore};
use crate::coordinator::monitor::start_heartbeat_monitor;
use crate::coordinator::registry::ClusterRegistry;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

pub struct Coordinator {
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    /// Bind the configured addresses and serve until an error occurs.
    pub async fn serve(self) -> Result<()> {
        let grpc_listener = TcpListener::bind(self.config.grpc_addr).await?;
        let http_listener = TcpListener::bind(self.config.http_addr).await?;
        self.run(grpc_listener, Some(http_listener)).await
    }

    /// Serve on pre-bound listeners. The admin HTTP API is optional.
    pub async fn run(self, grpc_listener: TcpListener, http_listener: Option<TcpListener>) -> Result<()> {
        self.config.validate()?;

        tracing::info!("Starting coordinator");
        tracing::info!("  gRPC API: {}", grpc_listener.local_addr()?);
        if let Some(listener) = &http_listener {
            tracing::info!("  HTTP API: {}", listener.local_addr()?);
        }
        tracing::info!("  Clusters: {}", self.config.num_clusters);
        tracing::info!("  Lock store: {:?}", self.config.lock_store);

        // Initialize lock store
        let (lock_store, memory_locks): (Arc<dyn LockStore>, Option<Arc<MemoryLockStore>>) =
            match self.config.lock_store {
                LockStoreKind::Memory => {
                    let store = Arc::new(MemoryLockStore::new());
                    (store.clone(), Some(store))
                }
                LockStoreKind::Disk => {
                    tracing::info!("  Lock dir: {}", self.config.lock_dir.display());
                    (Arc::new(DiskLockStore::open(&self.config.lock_dir)?), None)
                }
            };

        let registry = Arc::new(Mutex::new(ClusterRegistry::new(
            self.config.num_clusters,
            lock_store,
            self.config.max_heartbeat_delay(),
        )));

        let monitor = start_heartbeat_monitor(
            registry.clone(),
            self.config.heartbeat_check_interval(),
        );

        // Create gRPC server
        let grpc_service = CoordGrpcService::new(registry.clone());
        let grpc_server = tonic::transport::Server::builder()
            .add_service(grpc_service.into_server())
            .serve_with_incoming(TcpListenerStream::new(grpc_listener));

        tracing::info!("✓ Coordinator ready");

        let result = match http_listener {
            Some(listener) => {
                let router = create_router(CoordState {
                    registry,
                    locks: memory_locks,
                });
                let http_server = axum::serve(listener, router);

                tokio::select! {
                    res = http_server => {
                        if let Err(e) = &res {
                            tracing::error!("HTTP server error: {}", e);
                        }
                        res.map_err(crate::Error::from)
                    }
                    res = grpc_server => {
                        if let Err(e) = &res {
                            tracing::error!("gRPC server error: {}", e);
                        }
                        res.map_err(crate::Error::from)
                    }
                }
            }
            None => grpc_server.await.map_err(|e| {
                tracing::error!("gRPC server error: {}", e);
                crate::Error::from(e)
            }),
        };

        monitor.abort();
        result
    }
}
