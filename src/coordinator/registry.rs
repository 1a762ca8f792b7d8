//! Cluster registry: node records, leader election and client assignment
//!
//! Every mutation goes through `&mut self`; the coordinator wraps the whole
//! registry in one mutex, so each RPC and each monitor tick is atomic with
//! respect to the others.

use crate::common::{Error, Result};
use crate::coordinator::lock_store::{EntryKind, LockStore, WriteMode};
use crate::proto::ServerInfo;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Misses tolerated before a record counts as inactive
pub const MAX_MISSED_HEARTBEATS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Slave,
    Unknown,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Master => write!(f, "master"),
            NodeRole::Slave => write!(f, "slave"),
            NodeRole::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identity a node presents on every heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub cluster_id: i32,
    pub server_id: i32,
    pub hostname: String,
    pub port: String,
    pub kind: String,
    pub registered: bool,
}

impl From<&ServerInfo> for NodeIdentity {
    fn from(info: &ServerInfo) -> Self {
        Self {
            cluster_id: info.cluster_id,
            server_id: info.server_id,
            hostname: info.hostname.clone(),
            port: info.port.clone(),
            kind: info.r#type.clone(),
            registered: info.registered,
        }
    }
}

/// Stable reference to a record: (cluster index, server id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeKey {
    pub cluster_idx: usize,
    pub server_id: i32,
}

/// The coordinator's view of one replica node (zNode)
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub server_id: i32,
    pub cluster_id: i32,
    pub hostname: String,
    pub port: String,
    pub kind: String,
    pub role: NodeRole,
    pub lock_path: String,
    pub last_heartbeat: Instant,
    pub missed_heartbeats: u32,
}

impl NodeRecord {
    fn new(identity: &NodeIdentity, now: Instant) -> Self {
        Self {
            server_id: identity.server_id,
            cluster_id: identity.cluster_id,
            hostname: identity.hostname.clone(),
            port: identity.port.clone(),
            kind: identity.kind.clone(),
            role: NodeRole::Unknown,
            lock_path: String::new(),
            last_heartbeat: now,
            missed_heartbeats: 0,
        }
    }

    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    pub fn is_active(&self) -> bool {
        self.missed_heartbeats <= MAX_MISSED_HEARTBEATS
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// Host and port may change between restarts; lock path and role do not.
    fn refresh(&mut self, identity: &NodeIdentity, now: Instant) {
        self.hostname = identity.hostname.clone();
        self.port = identity.port.clone();
        self.kind = identity.kind.clone();
        self.last_heartbeat = now;
        self.missed_heartbeats = 0;
    }

    pub fn to_server_info(&self) -> ServerInfo {
        ServerInfo {
            server_id: self.server_id,
            cluster_id: self.cluster_id,
            hostname: self.hostname.clone(),
            port: self.port.clone(),
            r#type: self.kind.clone(),
            registered: true,
            changed: false,
        }
    }
}

impl std::fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "server {} in cluster {} @ {} ({}, lock: {:?})",
            self.server_id,
            self.cluster_id,
            self.address(),
            self.role,
            self.lock_path
        )
    }
}

/// Election result returned to the heartbeating node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatOutcome {
    pub lock_path: String,
    pub master: bool,
    pub sync_address: String,
}

/// What one monitor pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub warned: Vec<NodeKey>,
    pub demoted: Vec<NodeKey>,
}

pub fn master_lock_path(cluster_id: i32) -> String {
    format!("/cluster{}/master", cluster_id)
}

pub fn slave_lock_path(cluster_id: i32, server_id: i32) -> String {
    format!("/cluster{}/slave{}", cluster_id, server_id)
}

pub struct ClusterRegistry {
    clusters: Vec<BTreeMap<i32, NodeRecord>>,
    assignments: BTreeMap<u64, Option<NodeKey>>,
    next_client_id: u64,
    lock_store: Arc<dyn LockStore>,
    max_heartbeat_delay: Duration,
}

impl ClusterRegistry {
    /// A new registry owns no records, so election paths left behind by a
    /// previous coordinator (disk lock store) are released up front.
    pub fn new(
        num_clusters: usize,
        lock_store: Arc<dyn LockStore>,
        max_heartbeat_delay: Duration,
    ) -> Self {
        let registry = Self {
            clusters: vec![BTreeMap::new(); num_clusters],
            assignments: BTreeMap::new(),
            next_client_id: 0,
            lock_store,
            max_heartbeat_delay,
        };
        registry.release_stale_locks();
        registry
    }

    fn release_stale_locks(&self) {
        for cluster_id in 1..=self.clusters.len() as i32 {
            let cluster_path = format!("/cluster{}", cluster_id);
            match self.lock_store.remove(&cluster_path) {
                Ok(()) => tracing::info!("Released stale election locks under {}", cluster_path),
                Err(Error::PathNotFound(_)) => {}
                Err(e) => tracing::warn!("Failed to clear {}: {}", cluster_path, e),
            }
        }
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// 1-based external ID -> 0-based index
    fn cluster_index(&self, cluster_id: i32) -> Result<usize> {
        let idx = cluster_id as i64 - 1;
        if idx < 0 || idx >= self.clusters.len() as i64 {
            return Err(Error::InvalidClusterRange {
                cluster_id,
                num_clusters: self.clusters.len(),
            });
        }
        Ok(idx as usize)
    }

    pub fn record(&self, key: NodeKey) -> Option<&NodeRecord> {
        self.clusters.get(key.cluster_idx)?.get(&key.server_id)
    }

    pub fn cluster(&self, cluster_idx: usize) -> impl Iterator<Item = &NodeRecord> {
        self.clusters.get(cluster_idx).into_iter().flat_map(|c| c.values())
    }

    pub fn num_assignments(&self) -> usize {
        self.assignments.len()
    }

    /// Handle a heartbeat; runs an election unless the node already is master.
    pub fn heartbeat(&mut self, identity: &NodeIdentity, now: Instant) -> Result<HeartbeatOutcome> {
        let cluster_idx = self.cluster_index(identity.cluster_id)?;
        let cluster = &mut self.clusters[cluster_idx];

        if let Some(existing) = cluster.get(&identity.server_id) {
            if !identity.registered && existing.is_active() {
                tracing::error!(
                    "Rejecting registration of server {} in cluster {}: an active server already holds this identity",
                    identity.server_id,
                    identity.cluster_id
                );
                return Err(Error::RejectedRegistration {
                    cluster_id: identity.cluster_id,
                    server_id: identity.server_id,
                });
            }
        }

        let record = cluster
            .entry(identity.server_id)
            .or_insert_with(|| NodeRecord::new(identity, now));
        record.refresh(identity, now);

        if record.is_master() {
            tracing::debug!("Heartbeat from {}", record);
            return Ok(HeartbeatOutcome {
                lock_path: record.lock_path.clone(),
                master: true,
                sync_address: String::new(),
            });
        }

        let address = record.address();
        let outcome = self.elect(cluster_idx, identity, &address);

        let record = self.clusters[cluster_idx]
            .get_mut(&identity.server_id)
            .ok_or_else(|| Error::Internal("record vanished during election".into()))?;
        record.lock_path = outcome.lock_path.clone();
        record.role = if outcome.master {
            NodeRole::Master
        } else {
            NodeRole::Slave
        };

        if !identity.registered {
            if outcome.sync_address.is_empty() {
                tracing::info!(
                    "First heartbeat from {}. No other cluster master available to sync with",
                    record
                );
            } else if outcome.master {
                tracing::info!(
                    "First heartbeat from {}. Syncing with other cluster master @ {}",
                    record,
                    outcome.sync_address
                );
            } else {
                tracing::info!(
                    "First heartbeat from {}. Syncing with its cluster master @ {}",
                    record,
                    outcome.sync_address
                );
            }
        } else if outcome.master {
            tracing::info!("New master elected: {}", record);
        }

        Ok(outcome)
    }

    /// Try to take the cluster's master lock; fall back to slave.
    fn elect(&self, cluster_idx: usize, identity: &NodeIdentity, address: &str) -> HeartbeatOutcome {
        let master_path = master_lock_path(identity.cluster_id);

        if !self.lock_store.exists(&master_path) {
            match self
                .lock_store
                .create(&master_path, EntryKind::File, true)
            {
                Ok(()) => {
                    if let Err(e) = self.lock_store.write(
                        &master_path,
                        address.as_bytes(),
                        WriteMode::Overwrite,
                        true,
                    ) {
                        tracing::warn!("Failed to record master address in {}: {}", master_path, e);
                    }

                    // A fresh master bootstraps from another cluster instead of cold-starting.
                    let sync_address = if identity.registered {
                        String::new()
                    } else {
                        self.first_master_outside(cluster_idx)
                            .map(|r| r.address())
                            .unwrap_or_default()
                    };

                    return HeartbeatOutcome {
                        lock_path: master_path,
                        master: true,
                        sync_address,
                    };
                }
                Err(e) => {
                    tracing::debug!("Lost master race in cluster {}: {}", identity.cluster_id, e);
                }
            }
        }

        let slave_path = slave_lock_path(identity.cluster_id, identity.server_id);
        if let Err(e) =
            self.lock_store
                .write(&slave_path, address.as_bytes(), WriteMode::Overwrite, true)
        {
            tracing::warn!("Failed to write slave lock {}: {}", slave_path, e);
        }

        let sync_address = self
            .lock_store
            .read_string(&master_path)
            .unwrap_or_default();

        HeartbeatOutcome {
            lock_path: slave_path,
            master: false,
            sync_address,
        }
    }

    /// First master found in any cluster other than `cluster_idx`
    fn first_master_outside(&self, cluster_idx: usize) -> Option<&NodeRecord> {
        self.clusters
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != cluster_idx)
            .find_map(|(_, cluster)| cluster.values().find(|r| r.is_master()))
    }

    /// Active nodes in the caller's cluster, excluding the caller
    pub fn counterparts(&self, cluster_id: i32, server_id: i32) -> Result<Vec<NodeRecord>> {
        let cluster_idx = self.cluster_index(cluster_id)?;
        Ok(self.clusters[cluster_idx]
            .iter()
            .filter(|(id, record)| **id != server_id && record.is_active())
            .map(|(_, record)| record.clone())
            .collect())
    }

    /// At most one master per other cluster
    pub fn other_cluster_masters(&self, cluster_id: i32) -> Result<Vec<NodeRecord>> {
        let cluster_idx = self.cluster_index(cluster_id)?;
        Ok(self
            .clusters
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != cluster_idx)
            .filter_map(|(_, cluster)| cluster.values().find(|r| r.is_master()).cloned())
            .collect())
    }

    pub fn unique_client_id(&mut self) -> u64 {
        let id = self.next_client_id;
        self.next_client_id += 1;
        self.assignments.insert(id, None);
        tracing::info!("New unique client ID requested. Provided ID: {}", id);
        id
    }

    /// Current master for a client, re-resolving if the assignment went stale.
    /// Returns the record and whether the assignment changed.
    pub fn assigned_server(&mut self, client_id: u64) -> Result<(NodeRecord, bool)> {
        let current = self.assignments.get(&client_id).copied().flatten();

        if let Some(record) = current.and_then(|key| self.record(key)) {
            if record.is_master() {
                return Ok((record.clone(), false));
            }
        }

        let Some(key) = self.find_active_master(client_id) else {
            tracing::error!(
                "Server requested by client with ID {}, but no servers available to serve the request",
                client_id
            );
            return Err(Error::NoAvailableMaster);
        };
        self.assignments.insert(client_id, Some(key));

        let record = self
            .record(key)
            .cloned()
            .ok_or_else(|| Error::Internal("assigned record missing".into()))?;
        tracing::info!("Client with id {} assigned to {}", client_id, record);
        Ok((record, true))
    }

    /// Scan clusters starting at `client_id mod n`, wrapping around.
    fn find_active_master(&self, client_id: u64) -> Option<NodeKey> {
        let n = self.clusters.len();
        if n == 0 {
            return None;
        }
        let start = (client_id % n as u64) as usize;

        (0..n).map(|offset| (start + offset) % n).find_map(|idx| {
            self.clusters[idx]
                .values()
                .find(|r| r.is_master() && r.is_active())
                .map(|r| NodeKey {
                    cluster_idx: idx,
                    server_id: r.server_id,
                })
        })
    }

    /// One heartbeat monitor pass.
    ///
    /// A record whose last heartbeat is older than the delay gains a miss.
    /// The first miss only warns; the second clears mastery and frees the
    /// record's lock so the node (or a sibling) must win an election again.
    pub fn check_heartbeats(&mut self, now: Instant) -> MonitorReport {
        let mut report = MonitorReport::default();
        let delay = self.max_heartbeat_delay;

        for (cluster_idx, cluster) in self.clusters.iter_mut().enumerate() {
            for record in cluster.values_mut() {
                if now.saturating_duration_since(record.last_heartbeat) <= delay {
                    continue;
                }
                record.missed_heartbeats = record.missed_heartbeats.saturating_add(1);
                let key = NodeKey {
                    cluster_idx,
                    server_id: record.server_id,
                };

                match record.missed_heartbeats {
                    1 => {
                        tracing::warn!("Heartbeat missed by {}", record);
                        report.warned.push(key);
                    }
                    2 => {
                        tracing::warn!(
                            "2 heartbeats missed by {}. Releasing file lock",
                            record
                        );
                        let lock_path = std::mem::take(&mut record.lock_path);
                        record.role = NodeRole::Unknown;
                        if !lock_path.is_empty() {
                            if let Err(e) = self.lock_store.remove(&lock_path) {
                                tracing::warn!("Failed to release lock {}: {}", lock_path, e);
                            }
                        }
                        report.demoted.push(key);
                    }
                    _ => {}
                }
            }
        }

        report
    }
}
