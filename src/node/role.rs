//! Replica role tracking and the heartbeat sender
//!
//! The coordinator decides roles; a node only mirrors the last `Path` it
//! got back. Transitions:
//!
//! ```text
//! Unregistered ──register──► Master | Slave
//! Slave ──heartbeat(master)──► Master
//! Master ──heartbeat(slave)──► Slave
//! ```
//!
//! With a master lease configured, a master whose last confirming heartbeat
//! is older than the lease stops propagating until the next one succeeds.

use crate::common::{Error, Result};
use crate::node::coord_client::CoordinatorClient;
use crate::proto::{Path, ServerInfo};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unregistered,
    Master,
    Slave,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Unregistered => write!(f, "unregistered"),
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
        }
    }
}

#[derive(Debug)]
struct RoleInner {
    role: Role,
    confirmed_at: Option<Instant>,
}

/// Shared role of this node, updated from coordinator replies
#[derive(Debug)]
pub struct RoleState {
    inner: Mutex<RoleInner>,
    lease: Option<Duration>,
}

impl RoleState {
    pub fn new(lease: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(RoleInner {
                role: Role::Unregistered,
                confirmed_at: None,
            }),
            lease,
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, RoleInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn role(&self) -> Role {
        self.inner().role
    }

    /// Apply a coordinator reply. Returns `(old, new)` if the role changed.
    pub fn apply(&self, path: &Path, now: Instant) -> Option<(Role, Role)> {
        let mut inner = self.inner();
        let new_role = if path.master { Role::Master } else { Role::Slave };
        let old_role = inner.role;

        inner.role = new_role;
        inner.confirmed_at = Some(now);

        (old_role != new_role).then_some((old_role, new_role))
    }

    /// Whether this node should propagate client writes right now
    pub fn acts_as_master(&self, now: Instant) -> bool {
        let inner = self.inner();
        if inner.role != Role::Master {
            return false;
        }
        match (self.lease, inner.confirmed_at) {
            (None, _) => true,
            (Some(lease), Some(confirmed_at)) => now.duration_since(confirmed_at) <= lease,
            (Some(_), None) => false,
        }
    }
}

/// Send periodic heartbeats until one fails.
///
/// Resolves with [`Error::HeartbeatFailure`] on the first failed heartbeat;
/// the node treats that as fatal.
pub async fn send_heartbeats(
    coordinator: CoordinatorClient,
    info: ServerInfo,
    role: Arc<RoleState>,
    interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; registration already counted as one
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let path = match coordinator.heartbeat(&info).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Heartbeat to coordinator failed: {}", e);
                return Err(Error::HeartbeatFailure(e.to_string()));
            }
        };

        match role.apply(&path, Instant::now()) {
            Some((_, Role::Master)) => {
                tracing::info!(
                    "Master file lock acquired at {}. Server is now master",
                    path.path
                );
            }
            Some((old, new)) => {
                tracing::warn!("Role changed from {} to {} ({})", old, new, path.path);
            }
            None => tracing::debug!("Heartbeat acknowledged: {}", path.path),
        }
    }
}
