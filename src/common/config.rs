//! Configuration for tinysns components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration, as found in `tinysns.toml` and `TINYSNS__*` variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Replica node config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeConfig>,

    /// Client config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: None,
            node: None,
            client: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load `tinysns.toml` from the working directory (if any) layered with
    /// `TINYSNS__SECTION__FIELD` environment variables. Falls back to defaults.
    pub fn load() -> Self {
        match Self::load_from("tinysns") {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring unreadable configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Load from an explicit file stem or path (extension optional).
    pub fn load_from(path: impl AsRef<Path>) -> crate::Result<Self> {
        let name = path.as_ref().to_string_lossy().to_string();
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&name).required(false))
            .add_source(
                config::Environment::with_prefix("TINYSNS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStoreKind {
    #[default]
    Memory,
    Disk,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the gRPC coordination API
    #[serde(default = "default_coord_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Bind address for the admin HTTP API
    #[serde(default = "default_coord_http_addr")]
    pub http_addr: SocketAddr,

    /// Number of clusters (external IDs are 1..=num_clusters)
    #[serde(default = "default_num_clusters")]
    pub num_clusters: usize,

    /// A heartbeat older than this counts as missed
    #[serde(default = "default_max_heartbeat_delay")]
    pub max_heartbeat_delay_ms: u64,

    /// Heartbeat monitor tick
    #[serde(default = "default_heartbeat_check_interval")]
    pub heartbeat_check_interval_ms: u64,

    /// Backend for election locks
    #[serde(default)]
    pub lock_store: LockStoreKind,

    /// Root directory for the disk lock store
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
}

fn default_coord_grpc_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9000))
}
fn default_coord_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9080))
}
fn default_num_clusters() -> usize {
    3
}
fn default_max_heartbeat_delay() -> u64 {
    10_000
}
fn default_heartbeat_check_interval() -> u64 {
    3_000
}
fn default_lock_dir() -> PathBuf {
    PathBuf::from("./coord-locks")
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_coord_grpc_addr(),
            http_addr: default_coord_http_addr(),
            num_clusters: default_num_clusters(),
            max_heartbeat_delay_ms: default_max_heartbeat_delay(),
            heartbeat_check_interval_ms: default_heartbeat_check_interval(),
            lock_store: LockStoreKind::default(),
            lock_dir: default_lock_dir(),
        }
    }
}

impl CoordinatorConfig {
    pub fn max_heartbeat_delay(&self) -> Duration {
        Duration::from_millis(self.max_heartbeat_delay_ms)
    }

    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_check_interval_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.num_clusters == 0 {
            return Err(crate::Error::InvalidConfig(
                "num_clusters must be at least 1".into(),
            ));
        }
        if self.heartbeat_check_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "heartbeat_check_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Replica node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// 1-based cluster ID
    #[serde(default = "default_cluster_id")]
    pub cluster_id: i32,

    /// Server ID, unique within the cluster
    #[serde(default = "default_server_id")]
    pub server_id: i32,

    /// Host advertised to the coordinator and to peers
    #[serde(default = "default_host")]
    pub host: String,

    /// gRPC port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Coordinator gRPC endpoint
    #[serde(default = "default_coordinator_addr")]
    pub coordinator_addr: String,

    /// Root of the durable logs (one sub-directory per node identity)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_node_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Deadline for every outbound RPC
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Extra connection attempts per propagation target
    #[serde(default = "default_propagation_retries")]
    pub propagation_retries: usize,

    #[serde(default = "default_propagation_backoff")]
    pub propagation_backoff_ms: u64,

    /// When set, the node stops acting as master (no propagation) once this
    /// long has passed without a heartbeat reply confirming mastery.
    #[serde(default)]
    pub master_lease_ms: Option<u64>,

    /// Historical posts delivered on timeline join
    #[serde(default = "default_backlog_size")]
    pub backlog_size: usize,
}

fn default_cluster_id() -> i32 {
    1
}
fn default_server_id() -> i32 {
    1
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    10_000
}
fn default_coordinator_addr() -> String {
    "http://127.0.0.1:9000".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./sns")
}
fn default_node_heartbeat_interval() -> u64 {
    3_000
}
fn default_rpc_timeout() -> u64 {
    5_000
}
fn default_connect_timeout() -> u64 {
    2_000
}
fn default_propagation_retries() -> usize {
    2
}
fn default_propagation_backoff() -> u64 {
    100
}
fn default_backlog_size() -> usize {
    20
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cluster_id: default_cluster_id(),
            server_id: default_server_id(),
            host: default_host(),
            port: default_port(),
            coordinator_addr: default_coordinator_addr(),
            data_dir: default_data_dir(),
            heartbeat_interval_ms: default_node_heartbeat_interval(),
            rpc_timeout_ms: default_rpc_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            propagation_retries: default_propagation_retries(),
            propagation_backoff_ms: default_propagation_backoff(),
            master_lease_ms: None,
            backlog_size: default_backlog_size(),
        }
    }
}

impl NodeConfig {
    /// `host:port` as registered with the coordinator
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory holding this node's relationship and post logs
    pub fn node_dir(&self) -> PathBuf {
        self.data_dir
            .join(format!("c{}s{}", self.cluster_id, self.server_id))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn propagation_backoff(&self) -> Duration {
        Duration::from_millis(self.propagation_backoff_ms)
    }

    pub fn master_lease(&self) -> Option<Duration> {
        self.master_lease_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.cluster_id < 1 {
            return Err(crate::Error::InvalidConfig(
                "cluster_id is 1-based".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_coordinator_addr")]
    pub coordinator_addr: String,

    /// How often a long-running client re-asks the coordinator for its master
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,

    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,
}

fn default_refresh_interval() -> u64 {
    5_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: default_coordinator_addr(),
            refresh_interval_ms: default_refresh_interval(),
            rpc_timeout_ms: default_rpc_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.num_clusters, 3);
        assert_eq!(config.max_heartbeat_delay(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_check_interval(), Duration::from_secs(3));
        assert_eq!(config.lock_store, LockStoreKind::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_node_paths() {
        let config = NodeConfig {
            cluster_id: 2,
            server_id: 5,
            host: "10.0.0.4".into(),
            port: 10_010,
            data_dir: PathBuf::from("/var/sns"),
            ..Default::default()
        };
        assert_eq!(config.address(), "10.0.0.4:10010");
        assert_eq!(config.node_dir(), PathBuf::from("/var/sns/c2s5"));
        assert!(config.master_lease().is_none());
    }

    #[test]
    fn test_invalid_node_config() {
        let config = NodeConfig {
            cluster_id: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [coordinator]
            num_clusters = 5

            [node]
            cluster_id = 3
            master_lease_ms = 6000
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let coord = config.coordinator.unwrap();
        assert_eq!(coord.num_clusters, 5);
        assert_eq!(coord.heartbeat_check_interval_ms, 3_000);

        let node = config.node.unwrap();
        assert_eq!(node.cluster_id, 3);
        assert_eq!(node.backlog_size, 20);
        assert_eq!(node.master_lease(), Some(Duration::from_secs(6)));
        assert_eq!(config.log_level, "info");
    }
}
