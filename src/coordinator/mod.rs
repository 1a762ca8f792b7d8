//! Coordinator
//!
//! The coordinator is responsible for:
//! - Node registry (one record per replica node, never deleted)
//! - Per-cluster leader election through a lock store
//! - Heartbeat failure detection with two-miss hysteresis
//! - Client to cluster-master assignment
//! - Peer discovery for write propagation

pub mod grpc;
pub mod http;
pub mod lock_store;
pub mod monitor;
pub mod registry;
pub mod server;

pub use registry::{ClusterRegistry, NodeRecord, NodeRole};
pub use server::Coordinator;
