//! Replica node gRPC service
//!
//! Client-facing: Login, Follow, UnFollow, List, Timeline.
//! Server-to-server: GetLog (bootstrap sync), AddPost (post propagation).
//! Login/Follow/UnFollow double as propagation targets via `from_server`.

use crate::common::{timestamp_or_now, Error};
use crate::node::replication::{Propagator, ReplicatedOp};
use crate::node::store::{LoginOutcome, Post, Rejection, SocialStore};
use crate::proto::sns_service_server::{SnsService, SnsServiceServer};
use crate::proto::*;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tonic::{Request as GrpcRequest, Response, Status, Streaming};

/// Headroom on top of the backlog for live posts
const TIMELINE_BUFFER: usize = 64;

fn reply(status: SnsStatus, msg: impl Into<String>) -> Reply {
    Reply {
        status: status as i32,
        msg: msg.into(),
    }
}

fn rejection_reply(rejection: Rejection) -> Reply {
    let status = match rejection {
        Rejection::UnknownTarget => SnsStatus::FailureNotExists,
        Rejection::UnknownUser | Rejection::SelfTarget => SnsStatus::FailureInvalid,
        Rejection::AlreadyFollowing => SnsStatus::FailureAlreadyExists,
        Rejection::NotFollowing => SnsStatus::FailureNotAFollower,
    };
    reply(status, rejection.to_string())
}

/// SnsGrpcService serves one replica's social store.
#[derive(Clone)]
pub struct SnsGrpcService {
    store: Arc<Mutex<SocialStore>>,
    propagator: Arc<Propagator>,
    backlog_size: usize,
}

impl SnsGrpcService {
    pub fn new(store: Arc<Mutex<SocialStore>>, propagator: Arc<Propagator>, backlog_size: usize) -> Self {
        Self {
            store,
            propagator,
            backlog_size,
        }
    }

    /// Converts this service into a gRPC server instance.
    pub fn into_server(self) -> SnsServiceServer<Self> {
        SnsServiceServer::new(self)
    }

    fn store(&self) -> MutexGuard<'_, SocialStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a post, push it to live timelines, then forward it.
    async fn publish(&self, post: Post, from_server: bool) -> Result<(), Status> {
        let delivered = self.store().add_post(post.clone())?;
        tracing::debug!(
            "Post by {} stored, {} live deliveries",
            post.author,
            delivered
        );

        self.propagator
            .propagate(&ReplicatedOp::AddPost(post.to_message()), from_server)
            .await;
        Ok(())
    }
}

fn target_of(request: &Request) -> Option<&str> {
    request
        .arguments
        .first()
        .map(String::as_str)
        .filter(|target| !target.is_empty())
}

#[tonic::async_trait]
impl SnsService for SnsGrpcService {
    async fn login(&self, req: GrpcRequest<Request>) -> Result<Response<Reply>, Status> {
        let req = req.into_inner();
        let outcome = self.store().login(&req.username)?;

        let response = match outcome {
            LoginOutcome::InvalidName => {
                return Ok(Response::new(reply(
                    SnsStatus::FailureInvalid,
                    format!("invalid username {:?}", req.username),
                )));
            }
            LoginOutcome::Registered => reply(SnsStatus::Success, "Login successful"),
            LoginOutcome::Returning => reply(SnsStatus::Success, "Welcome back"),
        };
        tracing::info!("Login: {} ({:?})", req.username, outcome);

        let op = ReplicatedOp::Login {
            username: req.username,
        };
        self.propagator.propagate(&op, req.from_server).await;
        Ok(Response::new(response))
    }

    async fn follow(&self, req: GrpcRequest<Request>) -> Result<Response<Reply>, Status> {
        let req = req.into_inner();
        let Some(target) = target_of(&req).map(str::to_string) else {
            return Ok(Response::new(reply(SnsStatus::FailureInvalid, "missing user to follow")));
        };
        let at = timestamp_or_now(req.timestamp);

        let response = match self.store().follow(&req.username, &target, at)? {
            Ok(()) => {
                tracing::info!("{} now follows {}", req.username, target);
                reply(SnsStatus::Success, "Follow successful")
            }
            Err(rejection) => rejection_reply(rejection),
        };

        let op = ReplicatedOp::Follow {
            username: req.username,
            target,
            timestamp: at.timestamp(),
        };
        self.propagator.propagate(&op, req.from_server).await;
        Ok(Response::new(response))
    }

    async fn un_follow(&self, req: GrpcRequest<Request>) -> Result<Response<Reply>, Status> {
        let req = req.into_inner();
        let Some(target) = target_of(&req).map(str::to_string) else {
            return Ok(Response::new(reply(SnsStatus::FailureInvalid, "missing user to unfollow")));
        };

        let response = match self.store().unfollow(&req.username, &target)? {
            Ok(()) => {
                tracing::info!("{} unfollowed {}", req.username, target);
                reply(SnsStatus::Success, "UnFollow successful")
            }
            Err(rejection) => rejection_reply(rejection),
        };

        let op = ReplicatedOp::Unfollow {
            username: req.username,
            target,
        };
        self.propagator.propagate(&op, req.from_server).await;
        Ok(Response::new(response))
    }

    async fn list(&self, req: GrpcRequest<Request>) -> Result<Response<ListReply>, Status> {
        let req = req.into_inner();
        let listing = self
            .store()
            .list(&req.username)
            .ok_or(Error::UnknownUser(req.username))?;

        Ok(Response::new(ListReply {
            all_users: listing.all_users,
            followers: listing.followers,
            following: listing.following,
        }))
    }

    type TimelineStream = Pin<Box<dyn Stream<Item = Result<Message, Status>> + Send>>;

    async fn timeline(
        &self,
        req: GrpcRequest<Streaming<Message>>,
    ) -> Result<Response<Self::TimelineStream>, Status> {
        let mut inbound = req.into_inner();
        let (tx, rx) = mpsc::channel(self.backlog_size + TIMELINE_BUFFER);
        let service = self.clone();

        tokio::spawn(async move {
            let mut owner: Option<String> = None;

            while let Some(result) = inbound.next().await {
                let message = match result {
                    Ok(message) => message,
                    Err(status) => {
                        tracing::debug!("Timeline stream error: {}", status);
                        break;
                    }
                };

                // The first frame only binds the stream; its content is never stored
                let Some(username) = owner.clone() else {
                    let joined = service.store().open_timeline(
                        &message.username,
                        tx.clone(),
                        service.backlog_size,
                    );
                    if !joined {
                        let _ = tx
                            .send(Err(Error::UnknownUser(message.username).into()))
                            .await;
                        break;
                    }
                    tracing::info!("{} entered timeline mode", message.username);
                    owner = Some(message.username);
                    continue;
                };

                if message.msg.is_empty() {
                    continue;
                }
                let post = Post::new(username, &message.msg, timestamp_or_now(message.timestamp));
                if let Err(status) = service.publish(post, false).await {
                    tracing::error!("Timeline post failed: {}", status);
                    let _ = tx.send(Err(status)).await;
                    break;
                }
            }

            if let Some(username) = owner {
                service.store().close_timeline(&username, &tx);
                tracing::info!("{} left timeline mode", username);
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn get_log(
        &self,
        req: GrpcRequest<SiblingRequest>,
    ) -> Result<Response<LogReply>, Status> {
        let req = req.into_inner();
        let (userinfo, posts) = self.store().log_snapshot()?;
        tracing::info!(
            "Log requested by {} ({} bytes)",
            if req.requester.is_empty() { "unknown peer" } else { req.requester.as_str() },
            userinfo.len() + posts.len()
        );
        Ok(Response::new(LogReply { userinfo, posts }))
    }

    async fn add_post(&self, req: GrpcRequest<Request>) -> Result<Response<Reply>, Status> {
        let req = req.into_inner();
        let message = req
            .message
            .ok_or_else(|| Status::invalid_argument("AddPost requires a message"))?;
        if message.username.is_empty() {
            return Ok(Response::new(reply(SnsStatus::FailureInvalid, "post without author")));
        }

        let post = Post::new(
            message.username,
            &message.msg,
            timestamp_or_now(message.timestamp),
        );
        self.publish(post, req.from_server).await?;
        Ok(Response::new(reply(SnsStatus::Success, "Post stored")))
    }
}
