//! Replica node
//!
//! A replica node is responsible for:
//! - Registering with the coordinator and mirroring its role decision
//! - Durable social graph and post history (journal + in-memory store)
//! - Bootstrap sync from a sibling on (re)registration
//! - Propagating accepted writes while acting as master
//! - Live timeline streams

pub mod coord_client;
pub mod grpc;
pub mod journal;
pub mod peer_client;
pub mod replication;
pub mod role;
pub mod server;
pub mod store;

pub use role::Role;
pub use server::ReplicaServer;
pub use store::{Post, SocialStore};
