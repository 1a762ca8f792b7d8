//! Shared harness: real coordinator and replica servers on ephemeral ports

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tinysns::common::{CoordinatorConfig, NodeConfig};
use tinysns::proto::coord_service_client::CoordServiceClient;
use tinysns::proto::sns_service_client::SnsServiceClient;
use tinysns::proto::{Request, SnsStatus};
use tinysns::{Coordinator, ReplicaServer};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::transport::Channel;

pub const HEARTBEAT_MS: u64 = 100;

pub struct CoordHandle {
    pub addr: String,
    pub task: JoinHandle<tinysns::Result<()>>,
}

pub async fn start_coordinator(num_clusters: usize) -> CoordHandle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    let config = CoordinatorConfig {
        num_clusters,
        max_heartbeat_delay_ms: 3 * HEARTBEAT_MS,
        heartbeat_check_interval_ms: HEARTBEAT_MS,
        ..Default::default()
    };
    let task = tokio::spawn(Coordinator::new(config).run(listener, None));
    CoordHandle { addr, task }
}

pub struct NodeHandle {
    pub addr: String,
    pub task: JoinHandle<tinysns::Result<()>>,
}

impl NodeHandle {
    pub fn kill(&self) {
        self.task.abort();
    }
}

pub fn node_config(coord: &CoordHandle, cluster_id: i32, server_id: i32, data_dir: &Path) -> NodeConfig {
    NodeConfig {
        cluster_id,
        server_id,
        host: "127.0.0.1".into(),
        coordinator_addr: coord.addr.clone(),
        data_dir: data_dir.to_path_buf(),
        heartbeat_interval_ms: HEARTBEAT_MS,
        rpc_timeout_ms: 2_000,
        connect_timeout_ms: 500,
        propagation_retries: 1,
        propagation_backoff_ms: 20,
        ..Default::default()
    }
}

/// Start a node and wait until it answers RPCs.
pub async fn start_node(mut config: NodeConfig) -> NodeHandle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    config.port = listener.local_addr().unwrap().port();
    let addr = config.address();
    let task = tokio::spawn(ReplicaServer::new(config).run(listener));

    let probe = addr.clone();
    let ready = wait_for(Duration::from_secs(5), || {
        let probe = probe.clone();
        async move {
            let attempt = async {
                let mut client = SnsServiceClient::connect(format!("http://{}", probe)).await.ok()?;
                let res = client.list(request("__probe__", &[])).await;
                Some(res.is_err_and(|s| s.code() == tonic::Code::NotFound))
            };
            matches!(
                tokio::time::timeout(Duration::from_millis(500), attempt).await,
                Ok(Some(true))
            )
        }
    })
    .await;
    assert!(ready, "node {} never became ready", addr);

    NodeHandle { addr, task }
}

pub async fn coord_client(coord: &CoordHandle) -> CoordServiceClient<Channel> {
    CoordServiceClient::connect(coord.addr.clone()).await.unwrap()
}

pub async fn sns_client(addr: &str) -> SnsServiceClient<Channel> {
    SnsServiceClient::connect(format!("http://{}", addr))
        .await
        .unwrap()
}

pub fn request(username: &str, arguments: &[&str]) -> Request {
    Request {
        username: username.into(),
        arguments: arguments.iter().map(|a| a.to_string()).collect(),
        ..Default::default()
    }
}

pub fn status_of(status: i32) -> SnsStatus {
    SnsStatus::try_from(status).unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Users a node knows about, via List on an existing user
pub async fn known_users(addr: &str, as_user: &str) -> Vec<String> {
    let mut client = sns_client(addr).await;
    match client.list(request(as_user, &[])).await {
        Ok(reply) => reply.into_inner().all_users,
        Err(_) => Vec::new(),
    }
}
