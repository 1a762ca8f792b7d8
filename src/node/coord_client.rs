use crate::common::{connect_channel, Result};
use crate::proto::coord_service_client::CoordServiceClient;
use crate::proto::*;
use std::time::Duration;
use tonic::transport::Channel;

/// A replica node's handle on the coordinator.
///
/// Cloning is cheap; every call runs on a clone of the underlying client.
#[derive(Clone)]
pub struct CoordinatorClient {
    client: CoordServiceClient<Channel>,
}

impl CoordinatorClient {
    pub async fn connect(addr: &str, connect_timeout: Duration, rpc_timeout: Duration) -> Result<Self> {
        let channel = connect_channel(addr, connect_timeout, rpc_timeout).await?;
        Ok(Self {
            client: CoordServiceClient::new(channel),
        })
    }

    pub async fn heartbeat(&self, info: &ServerInfo) -> Result<Path> {
        let response = self.client.clone().heartbeat(info.clone()).await?;
        Ok(response.into_inner())
    }

    /// Other live members of the caller's cluster
    pub async fn counterparts(&self, info: &ServerInfo) -> Result<Vec<ServerInfo>> {
        let response = self.client.clone().get_counterparts(info.clone()).await?;
        Ok(response.into_inner().servers)
    }

    /// Current master of every other cluster that has one
    pub async fn other_cluster_masters(&self, info: &ServerInfo) -> Result<Vec<ServerInfo>> {
        let response = self
            .client
            .clone()
            .get_other_cluster_masters(info.clone())
            .await?;
        Ok(response.into_inner().servers)
    }
}
