//! Write propagation
//!
//! A master forwards every accepted write to its live siblings. Writes that
//! came straight from a client also go to the master of every other
//! cluster, which then forwards to its own siblings only. Forwarded
//! requests carry `from_server = true`, so a write crosses at most one
//! cluster boundary and never loops.
//!
//! Delivery is best effort: failures are logged and never roll back the
//! local write. Only connection setup is retried.

use crate::common::{retry_with_backoff, Error, NodeConfig, Result};
use crate::node::coord_client::CoordinatorClient;
use crate::node::peer_client::PeerClient;
use crate::node::role::RoleState;
use crate::proto::{Message, Reply, Request, ServerInfo, SnsStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A replicated mutation
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicatedOp {
    Login {
        username: String,
    },
    Follow {
        username: String,
        target: String,
        timestamp: i64,
    },
    Unfollow {
        username: String,
        target: String,
    },
    AddPost(Message),
}

impl ReplicatedOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "Login",
            Self::Follow { .. } => "Follow",
            Self::Unfollow { .. } => "UnFollow",
            Self::AddPost(_) => "AddPost",
        }
    }

    /// The request forwarded to peers
    pub fn to_request(&self) -> Request {
        let mut request = Request {
            from_server: true,
            ..Default::default()
        };
        match self {
            Self::Login { username } => {
                request.username = username.clone();
            }
            Self::Follow {
                username,
                target,
                timestamp,
            } => {
                request.username = username.clone();
                request.arguments = vec![target.clone()];
                request.timestamp = *timestamp;
            }
            Self::Unfollow { username, target } => {
                request.username = username.clone();
                request.arguments = vec![target.clone()];
            }
            Self::AddPost(message) => {
                request.username = message.username.clone();
                request.timestamp = message.timestamp;
                request.message = Some(message.clone());
            }
        }
        request
    }

    async fn send(&self, peer: &mut PeerClient) -> Result<Reply> {
        let request = self.to_request();
        match self {
            Self::Login { .. } => peer.login(request).await,
            Self::Follow { .. } => peer.follow(request).await,
            Self::Unfollow { .. } => peer.unfollow(request).await,
            Self::AddPost(_) => peer.add_post(request).await,
        }
    }
}

/// Peer groups a write is forwarded to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Siblings,
    OtherClusterMasters,
}

/// Forwarding plan for a write accepted by a master.
pub fn destinations(from_server: bool) -> &'static [Destination] {
    if from_server {
        &[Destination::Siblings]
    } else {
        &[Destination::Siblings, Destination::OtherClusterMasters]
    }
}

/// Delivery counts of one propagation round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Propagator {
    coordinator: CoordinatorClient,
    info: ServerInfo,
    role: Arc<RoleState>,
    connect_timeout: Duration,
    rpc_timeout: Duration,
    retries: usize,
    backoff: Duration,
}

impl Propagator {
    pub fn new(
        coordinator: CoordinatorClient,
        info: ServerInfo,
        role: Arc<RoleState>,
        config: &NodeConfig,
    ) -> Self {
        Self {
            coordinator,
            info,
            role,
            connect_timeout: config.connect_timeout(),
            rpc_timeout: config.rpc_timeout(),
            retries: config.propagation_retries,
            backoff: config.propagation_backoff(),
        }
    }

    /// Forward `op` if this node is acting master; no-op otherwise.
    pub async fn propagate(&self, op: &ReplicatedOp, from_server: bool) -> PropagationReport {
        let mut report = PropagationReport::default();
        if !self.role.acts_as_master(Instant::now()) {
            return report;
        }

        for destination in destinations(from_server) {
            let peers = match self.lookup(*destination).await {
                Ok(peers) => peers,
                Err(e) => {
                    tracing::error!("Peer lookup ({:?}) for {} failed: {}", destination, op.name(), e);
                    continue;
                }
            };

            for peer in peers {
                let addr = format!("{}:{}", peer.hostname, peer.port);
                match self.forward(op, &addr).await {
                    Ok(reply) => {
                        report.delivered += 1;
                        tracing::debug!(
                            "{} forwarded to cluster {} server {} ({}): {:?}",
                            op.name(),
                            peer.cluster_id,
                            peer.server_id,
                            addr,
                            SnsStatus::try_from(reply.status).unwrap_or(SnsStatus::FailureUnknown)
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!("{}", e);
                    }
                }
            }
        }
        report
    }

    async fn lookup(&self, destination: Destination) -> Result<Vec<ServerInfo>> {
        match destination {
            Destination::Siblings => self.coordinator.counterparts(&self.info).await,
            Destination::OtherClusterMasters => {
                self.coordinator.other_cluster_masters(&self.info).await
            }
        }
    }

    async fn forward(&self, op: &ReplicatedOp, addr: &str) -> Result<Reply> {
        let mut peer = retry_with_backoff(
            || PeerClient::connect(addr, self.connect_timeout, self.rpc_timeout),
            self.retries,
            self.backoff,
        )
        .await
        .map_err(|e| Error::Propagation {
            target: addr.to_string(),
            reason: e.to_string(),
        })?;

        op.send(&mut peer).await.map_err(|e| Error::Propagation {
            target: peer.addr().to_string(),
            reason: format!("{} rejected: {}", op.name(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_writes_cross_clusters_once() {
        assert_eq!(
            destinations(false),
            &[Destination::Siblings, Destination::OtherClusterMasters]
        );
        assert_eq!(destinations(true), &[Destination::Siblings]);
    }

    #[test]
    fn test_forwarded_requests_are_marked() {
        let ops = [
            ReplicatedOp::Login {
                username: "alice".into(),
            },
            ReplicatedOp::Follow {
                username: "alice".into(),
                target: "bob".into(),
                timestamp: 10,
            },
            ReplicatedOp::Unfollow {
                username: "alice".into(),
                target: "bob".into(),
            },
            ReplicatedOp::AddPost(Message {
                username: "bob".into(),
                msg: "hi".into(),
                timestamp: 20,
            }),
        ];
        for op in &ops {
            let request = op.to_request();
            assert!(request.from_server, "{} not marked", op.name());
            assert!(!request.username.is_empty());
        }

        let follow = ops[1].to_request();
        assert_eq!(follow.arguments, vec!["bob".to_string()]);
        assert_eq!(follow.timestamp, 10);

        let post = ops[3].to_request();
        assert_eq!(post.message.unwrap().msg, "hi");
        assert_eq!(post.timestamp, 20);
    }
}
