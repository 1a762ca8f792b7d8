//! Error types for tinysns

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Coordination Errors ===
    #[error("Server registration rejected: server {server_id} in cluster {cluster_id} is already active")]
    RejectedRegistration { cluster_id: i32, server_id: i32 },

    #[error("Invalid cluster ID {cluster_id}: specify an ID between 1 and {num_clusters}")]
    InvalidClusterRange { cluster_id: i32, num_clusters: usize },

    #[error("No servers available to serve the request")]
    NoAvailableMaster,

    // === Lock Store Errors ===
    #[error("Lock store path already exists: {0}")]
    PathExists(String),

    #[error("Lock store path not found: {0}")]
    PathNotFound(String),

    #[error("Lock store error: {0}")]
    LockStore(String),

    // === Replication Errors ===
    #[error("Bootstrap sync from {addr} failed: {reason}")]
    BootstrapSync { addr: String, reason: String },

    #[error("Propagation to {target} failed: {reason}")]
    Propagation { target: String, reason: String },

    #[error("Heartbeat to coordinator failed: {0}")]
    HeartbeatFailure(String),

    // === Journal Errors ===
    #[error("Malformed journal entry: {0}")]
    Journal(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    // === Social Graph Errors ===
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    // === Network Errors ===
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_) | Error::Transport(_) | Error::NoAvailableMaster
        )
    }

    /// Convert to gRPC status for RPC responses
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::InvalidClusterRange { .. } | Error::InvalidConfig(_) => {
                tonic::Status::new(Code::InvalidArgument, self.to_string())
            }
            Error::RejectedRegistration { .. } | Error::PathExists(_) => {
                tonic::Status::new(Code::AlreadyExists, self.to_string())
            }
            Error::NoAvailableMaster => tonic::Status::new(Code::Unavailable, self.to_string()),
            Error::UnknownUser(_) | Error::PathNotFound(_) => {
                tonic::Status::new(Code::NotFound, self.to_string())
            }
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        e.to_grpc_status()
    }
}
