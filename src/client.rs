//! Client library
//!
//! A client never picks a server itself: it registers with the coordinator
//! for a client ID, asks `GetServer` which master serves it, and asks again
//! when that master stops answering or the refresh interval has passed.

use crate::common::{connect_channel, ClientConfig, Error, Result};
use crate::proto::coord_service_client::CoordServiceClient;
use crate::proto::sns_service_client::SnsServiceClient;
use crate::proto::*;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Code, Status, Streaming};

/// Status codes meaning "the server is gone", as opposed to a real answer
fn is_unreachable(status: &Status) -> bool {
    matches!(
        status.code(),
        Code::Unavailable | Code::Unknown | Code::DeadlineExceeded | Code::Cancelled
    )
}

fn lookup_error(status: Status) -> Error {
    if status.code() == Code::Unavailable {
        Error::NoAvailableMaster
    } else {
        Error::Grpc(status)
    }
}

struct Assigned {
    addr: String,
    client: SnsServiceClient<Channel>,
    resolved_at: Instant,
}

pub struct SnsClient {
    coordinator: CoordServiceClient<Channel>,
    client_id: u64,
    username: String,
    server: Option<Assigned>,
    refresh_interval: Duration,
    rpc_timeout: Duration,
}

impl SnsClient {
    /// Register with the coordinator as `username`.
    pub async fn connect(config: &ClientConfig, username: impl Into<String>) -> Result<Self> {
        let channel =
            connect_channel(&config.coordinator_addr, config.rpc_timeout(), config.rpc_timeout())
                .await?;
        let mut coordinator = CoordServiceClient::new(channel);
        let client_id = coordinator
            .get_unique_client_id(ClientRequest {})
            .await?
            .into_inner()
            .id;

        let username = username.into();
        tracing::debug!("Client {} registered as id {}", username, client_id);

        Ok(Self {
            coordinator,
            client_id,
            username,
            server: None,
            refresh_interval: config.refresh_interval(),
            rpc_timeout: config.rpc_timeout(),
        })
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Address of the currently assigned server, resolving it if needed
    pub async fn current_server(&mut self) -> Result<String> {
        self.server().await?;
        Ok(self
            .server
            .as_ref()
            .map(|s| s.addr.clone())
            .unwrap_or_default())
    }

    async fn resolve(&mut self) -> Result<()> {
        let info = self
            .coordinator
            .get_server(Id { id: self.client_id })
            .await
            .map_err(lookup_error)?
            .into_inner();
        let addr = format!("{}:{}", info.hostname, info.port);

        if let Some(current) = self.server.as_mut().filter(|s| s.addr == addr) {
            current.resolved_at = Instant::now();
            return Ok(());
        }

        let channel = connect_channel(&addr, self.rpc_timeout, self.rpc_timeout).await?;
        if info.changed {
            tracing::info!(
                "Reassigned to cluster {} server {} at {}",
                info.cluster_id,
                info.server_id,
                addr
            );
        }
        self.server = Some(Assigned {
            addr,
            client: SnsServiceClient::new(channel),
            resolved_at: Instant::now(),
        });
        Ok(())
    }

    async fn server(&mut self) -> Result<SnsServiceClient<Channel>> {
        let stale = self
            .server
            .as_ref()
            .map_or(true, |s| s.resolved_at.elapsed() >= self.refresh_interval);
        if stale {
            self.resolve().await?;
        }
        self.server
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or(Error::NoAvailableMaster)
    }

    /// Run `call` against the assigned server, re-resolving once if it is
    /// unreachable.
    async fn with_server<T, F, Fut>(&mut self, call: F) -> Result<T>
    where
        F: Fn(SnsServiceClient<Channel>) -> Fut,
        Fut: Future<Output = std::result::Result<tonic::Response<T>, Status>>,
    {
        let client = self.server().await?;
        match call(client).await {
            Ok(response) => Ok(response.into_inner()),
            Err(status) if is_unreachable(&status) => {
                tracing::warn!("Server unreachable ({}), asking coordinator again", status.message());
                self.server = None;
                let client = self.server().await?;
                Ok(call(client).await?.into_inner())
            }
            Err(status) => Err(status.into()),
        }
    }

    fn request(&self, arguments: Vec<String>) -> Request {
        Request {
            username: self.username.clone(),
            arguments,
            ..Default::default()
        }
    }

    pub async fn login(&mut self) -> Result<Reply> {
        let request = self.request(Vec::new());
        self.with_server(|mut c| {
            let request = request.clone();
            async move { c.login(request).await }
        })
        .await
    }

    pub async fn follow(&mut self, target: &str) -> Result<Reply> {
        let mut request = self.request(vec![target.to_string()]);
        request.timestamp = chrono::Utc::now().timestamp();
        self.with_server(|mut c| {
            let request = request.clone();
            async move { c.follow(request).await }
        })
        .await
    }

    pub async fn unfollow(&mut self, target: &str) -> Result<Reply> {
        let request = self.request(vec![target.to_string()]);
        self.with_server(|mut c| {
            let request = request.clone();
            async move { c.un_follow(request).await }
        })
        .await
    }

    pub async fn list(&mut self) -> Result<ListReply> {
        let request = self.request(Vec::new());
        self.with_server(|mut c| {
            let request = request.clone();
            async move { c.list(request).await }
        })
        .await
    }

    /// Open the timeline stream. The backlog arrives first, newest first,
    /// followed by live posts.
    pub async fn timeline(&mut self) -> Result<Timeline> {
        let mut client = self.server().await?;
        let (tx, rx) = mpsc::channel(16);

        // Joining sentinel binds the stream to this user
        tx.send(Message {
            username: self.username.clone(),
            msg: String::new(),
            timestamp: chrono::Utc::now().timestamp(),
        })
        .await
        .map_err(|_| Error::Internal("timeline channel closed".into()))?;

        let inbound = client.timeline(ReceiverStream::new(rx)).await?.into_inner();
        Ok(Timeline {
            username: self.username.clone(),
            outbound: tx,
            inbound,
        })
    }

    /// Publish a single post and wait until the server has taken it.
    pub async fn post(&mut self, content: &str) -> Result<()> {
        let mut timeline = self.timeline().await?;
        timeline.post(content).await?;

        // Hang up our side; the server ends the stream once it has
        // processed everything we sent.
        let Timeline {
            outbound,
            mut inbound,
            ..
        } = timeline;
        drop(outbound);
        while inbound.message().await?.is_some() {}
        Ok(())
    }
}

/// An open timeline stream
pub struct Timeline {
    username: String,
    outbound: mpsc::Sender<Message>,
    inbound: Streaming<Message>,
}

impl Timeline {
    pub async fn post(&self, content: &str) -> Result<()> {
        self.outbound
            .send(Message {
                username: self.username.clone(),
                msg: content.to_string(),
                timestamp: chrono::Utc::now().timestamp(),
            })
            .await
            .map_err(|_| Error::ConnectionFailed("timeline stream closed".into()))
    }

    /// Next post from a followee, or `None` once the server ends the stream
    pub async fn next(&mut self) -> Result<Option<Message>> {
        Ok(self.inbound.message().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_codes() {
        assert!(is_unreachable(&Status::unavailable("connection refused")));
        assert!(is_unreachable(&Status::deadline_exceeded("slow")));
        assert!(!is_unreachable(&Status::not_found("no such user")));
        assert!(!is_unreachable(&Status::invalid_argument("bad")));
    }

    #[test]
    fn test_lookup_error_mapping() {
        assert!(matches!(
            lookup_error(Status::unavailable("none")),
            Error::NoAvailableMaster
        ));
        assert!(matches!(
            lookup_error(Status::internal("boom")),
            Error::Grpc(_)
        ));
    }
}
