//! # tinysns
//!
//! A replicated, multi-cluster social network backend:
//! - Coordinator-driven leader election per cluster (lock store based)
//! - Heartbeat failure detection with two-miss hysteresis
//! - Best-effort write propagation to siblings and other cluster masters
//! - Bootstrap sync from a peer's durable logs
//! - Live timeline fan-out over a bidirectional gRPC stream
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────────────────────┐
//!              │          Coordinator         │
//!              │ election · liveness · lookup │
//!              └───────┬──────────────┬───────┘
//!          heartbeat   │              │  GetServer
//!   ┌──────────────────┴──┐      ┌────┴─────────┐
//!   │ Cluster 1           │      │   Client     │
//!   │  master ─► slaves   │◄─────┤ login/follow │
//!   └─────────┬───────────┘      │ timeline     │
//!             │ propagation      └──────────────┘
//!   ┌─────────▼───────────┐
//!   │ Cluster 2 master    │ ─► its slaves
//!   └─────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! tinysns-coord serve --grpc 0.0.0.0:9000 --clusters 3
//! ```
//!
//! ### Start replica nodes
//! ```bash
//! tinysns-server --cluster 1 --server 1 --port 10000 --coordinator http://localhost:9000
//! tinysns-server --cluster 1 --server 2 --port 10001 --coordinator http://localhost:9000
//! ```
//!
//! ### Use the CLI
//! ```bash
//! tinysns --user alice login
//! tinysns --user alice follow bob
//! tinysns --user alice timeline
//! ```

#![allow(clippy::result_large_err)]

pub mod client;
pub mod common;
pub mod coordinator;
pub mod node;

// Re-export commonly used types
pub use common::{Error, Result};
pub use coordinator::Coordinator;
pub use node::ReplicaServer;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("sns");
}

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
