use crate::common::{connect_channel, Error, Result};
use crate::proto::sns_service_client::SnsServiceClient;
use crate::proto::*;
use std::time::Duration;
use tonic::transport::Channel;

/// Server-to-server client for log sync and write propagation
pub struct PeerClient {
    addr: String,
    client: SnsServiceClient<Channel>,
}

impl PeerClient {
    pub async fn connect(addr: &str, connect_timeout: Duration, rpc_timeout: Duration) -> Result<Self> {
        let channel = connect_channel(addr, connect_timeout, rpc_timeout).await?;
        Ok(Self {
            addr: addr.to_string(),
            client: SnsServiceClient::new(channel),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Fetch the peer's full (relationship log, post log)
    pub async fn fetch_log(&mut self, requester: &str) -> Result<(String, String)> {
        let request = tonic::Request::new(SiblingRequest {
            requester: requester.to_string(),
        });
        let reply = self
            .client
            .get_log(request)
            .await
            .map_err(|status| Error::BootstrapSync {
                addr: self.addr.clone(),
                reason: status.message().to_string(),
            })?
            .into_inner();
        Ok((reply.userinfo, reply.posts))
    }

    pub async fn login(&mut self, request: Request) -> Result<Reply> {
        Ok(self.client.login(request).await?.into_inner())
    }

    pub async fn follow(&mut self, request: Request) -> Result<Reply> {
        Ok(self.client.follow(request).await?.into_inner())
    }

    pub async fn unfollow(&mut self, request: Request) -> Result<Reply> {
        Ok(self.client.un_follow(request).await?.into_inner())
    }

    pub async fn add_post(&mut self, request: Request) -> Result<Reply> {
        Ok(self.client.add_post(request).await?.into_inner())
    }
}
