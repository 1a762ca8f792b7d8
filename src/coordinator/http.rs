//! Admin HTTP API for the coordinator
//!
//! - `GET /health`: liveness
//! - `GET /admin/status`: every cluster's records, masters and lock tree

use crate::coordinator::lock_store::MemoryLockStore;
use crate::coordinator::registry::{ClusterRegistry, NodeRole};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Clone)]
pub struct CoordState {
    pub registry: Arc<Mutex<ClusterRegistry>>,
    /// Present when the in-memory lock store is in use
    pub locks: Option<Arc<MemoryLockStore>>,
}

#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub server_id: i32,
    pub address: String,
    pub role: NodeRole,
    pub active: bool,
    pub lock_path: String,
    pub missed_heartbeats: u32,
    pub secs_since_heartbeat: u64,
}

#[derive(Debug, Serialize)]
pub struct ClusterStatus {
    pub cluster_id: usize,
    pub master: Option<i32>,
    pub nodes: Vec<NodeStatus>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub num_clusters: usize,
    pub clients: usize,
    pub clusters: Vec<ClusterStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locks: Option<Vec<String>>,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/status", get(admin_status))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn admin_status(State(state): State<CoordState>) -> Json<StatusResponse> {
    Json(build_status(&state))
}

pub fn build_status(state: &CoordState) -> StatusResponse {
    let now = Instant::now();
    let registry = state.registry.lock().unwrap_or_else(|e| e.into_inner());

    let clusters = (0..registry.num_clusters())
        .map(|idx| {
            let nodes: Vec<NodeStatus> = registry
                .cluster(idx)
                .map(|r| NodeStatus {
                    server_id: r.server_id,
                    address: r.address(),
                    role: r.role,
                    active: r.is_active(),
                    lock_path: r.lock_path.clone(),
                    missed_heartbeats: r.missed_heartbeats,
                    secs_since_heartbeat: now.saturating_duration_since(r.last_heartbeat).as_secs(),
                })
                .collect();
            ClusterStatus {
                cluster_id: idx + 1,
                master: registry
                    .cluster(idx)
                    .find(|r| r.is_master())
                    .map(|r| r.server_id),
                nodes,
            }
        })
        .collect();

    StatusResponse {
        version: crate::VERSION,
        num_clusters: registry.num_clusters(),
        clients: registry.num_assignments(),
        clusters,
        locks: state.locks.as_ref().map(|l| l.dump()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::registry::NodeIdentity;
    use std::time::Duration;

    #[test]
    fn test_status_snapshot() {
        let locks = Arc::new(MemoryLockStore::new());
        let registry = Arc::new(Mutex::new(ClusterRegistry::new(
            2,
            locks.clone(),
            Duration::from_secs(10),
        )));
        registry
            .lock()
            .unwrap()
            .heartbeat(
                &NodeIdentity {
                    cluster_id: 2,
                    server_id: 7,
                    hostname: "localhost".into(),
                    port: "10007".into(),
                    kind: "SERVER".into(),
                    registered: false,
                },
                Instant::now(),
            )
            .unwrap();

        let status = build_status(&CoordState {
            registry,
            locks: Some(locks),
        });
        assert_eq!(status.num_clusters, 2);
        assert!(status.clusters[0].nodes.is_empty());
        assert_eq!(status.clusters[1].master, Some(7));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["clusters"][1]["nodes"][0]["role"], "master");
        assert!(json["locks"]
            .as_array()
            .unwrap()
            .iter()
            .any(|l| l.as_str().unwrap().contains("cluster2/master")));
    }
}
