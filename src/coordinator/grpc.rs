//! Coordinator gRPC service
//!
//! Server-facing: Heartbeat (registration + election), GetCounterparts,
//! GetOtherClusterMasters. Client-facing: GetUniqueClientID, GetServer.

use crate::coordinator::registry::{ClusterRegistry, NodeIdentity};
use crate::proto::coord_service_server::{CoordService, CoordServiceServer};
use crate::proto::*;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tonic::{Request, Response, Status};

/// CoordGrpcService implements the coordination API over a shared registry.
pub struct CoordGrpcService {
    registry: Arc<Mutex<ClusterRegistry>>,
}

impl CoordGrpcService {
    pub fn new(registry: Arc<Mutex<ClusterRegistry>>) -> Self {
        Self { registry }
    }

    /// Converts this service into a gRPC server instance.
    pub fn into_server(self) -> CoordServiceServer<Self> {
        CoordServiceServer::new(self)
    }

    fn registry(&self) -> MutexGuard<'_, ClusterRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn describe(info: &ServerInfo) -> String {
    format!(
        "server {} in cluster {} @ {}:{}",
        info.server_id, info.cluster_id, info.hostname, info.port
    )
}

#[tonic::async_trait]
impl CoordService for CoordGrpcService {
    async fn heartbeat(&self, req: Request<ServerInfo>) -> Result<Response<Path>, Status> {
        let info = req.into_inner();
        let identity = NodeIdentity::from(&info);

        let outcome = self.registry().heartbeat(&identity, Instant::now())?;

        Ok(Response::new(Path {
            path: outcome.lock_path,
            master: outcome.master,
            sync_address: outcome.sync_address,
        }))
    }

    async fn get_counterparts(
        &self,
        req: Request<ServerInfo>,
    ) -> Result<Response<ServerList>, Status> {
        let info = req.into_inner();
        let records = self
            .registry()
            .counterparts(info.cluster_id, info.server_id)?;

        tracing::info!("Counterparts requested by {}", describe(&info));
        Ok(Response::new(ServerList {
            servers: records.iter().map(|r| r.to_server_info()).collect(),
        }))
    }

    async fn get_other_cluster_masters(
        &self,
        req: Request<ServerInfo>,
    ) -> Result<Response<ServerList>, Status> {
        let info = req.into_inner();
        let records = self.registry().other_cluster_masters(info.cluster_id)?;

        tracing::info!("Other cluster masters requested by {}", describe(&info));
        Ok(Response::new(ServerList {
            servers: records.iter().map(|r| r.to_server_info()).collect(),
        }))
    }

    async fn get_unique_client_id(
        &self,
        _req: Request<ClientRequest>,
    ) -> Result<Response<Id>, Status> {
        let id = self.registry().unique_client_id();
        Ok(Response::new(Id { id }))
    }

    async fn get_server(&self, req: Request<Id>) -> Result<Response<ServerInfo>, Status> {
        let id = req.into_inner().id;
        let (record, changed) = self.registry().assigned_server(id)?;

        let mut info = record.to_server_info();
        info.changed = changed;
        Ok(Response::new(info))
    }
}
