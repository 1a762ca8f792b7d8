//! Timeline streaming: backlog on join, live fan-out, client library

mod common;

use common::*;
use std::time::Duration;
use tempfile::tempdir;
use tinysns::client::SnsClient;
use tinysns::common::ClientConfig;
use tinysns::proto::{Message, Request, SnsStatus};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const FOLLOW_AT: i64 = 1_800_000_000;

fn follow_at(follower: &str, followee: &str, timestamp: i64) -> Request {
    let mut request = request(follower, &[followee]);
    request.timestamp = timestamp;
    request
}

fn message(username: &str, msg: &str, timestamp: i64) -> Message {
    Message {
        username: username.into(),
        msg: msg.into(),
        timestamp,
    }
}

#[tokio::test]
async fn test_join_receives_capped_backlog_then_live_posts() {
    let dir = tempdir().unwrap();
    let coord = start_coordinator(1).await;
    let node = start_node(node_config(&coord, 1, 1, dir.path())).await;
    let mut client = sns_client(&node.addr).await;

    for user in ["alice", "bob"] {
        client.login(request(user, &[])).await.unwrap();
    }
    let reply = client
        .follow(follow_at("alice", "bob", FOLLOW_AT))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status_of(reply.status), SnsStatus::Success);

    // bob posts 25 times through his own timeline stream
    let (bob_tx, bob_rx) = mpsc::channel(32);
    bob_tx.send(message("bob", "", 0)).await.unwrap();
    for i in 1..=25 {
        bob_tx
            .send(message("bob", &format!("post {}", i), FOLLOW_AT + i))
            .await
            .unwrap();
    }
    drop(bob_tx);
    let mut bob_stream = client
        .timeline(ReceiverStream::new(bob_rx))
        .await
        .unwrap()
        .into_inner();
    // Stream ends once everything bob sent has been processed
    while bob_stream.message().await.unwrap().is_some() {}

    let (alice_tx, alice_rx) = mpsc::channel(4);
    alice_tx.send(message("alice", "", 0)).await.unwrap();
    let mut alice_stream = client
        .timeline(ReceiverStream::new(alice_rx))
        .await
        .unwrap()
        .into_inner();

    let mut backlog = Vec::new();
    for _ in 0..20 {
        backlog.push(alice_stream.message().await.unwrap().unwrap());
    }
    assert_eq!(backlog[0].msg, "post 25");
    assert_eq!(backlog[19].msg, "post 6");
    assert!(backlog.iter().all(|m| m.username == "bob"));

    // Nothing else is pending
    let extra = tokio::time::timeout(Duration::from_millis(200), alice_stream.message()).await;
    assert!(extra.is_err());

    // Live post arrives on the open stream
    let reply = client
        .add_post(Request {
            username: "bob".into(),
            message: Some(message("bob", "live one", FOLLOW_AT + 100)),
            ..Default::default()
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status_of(reply.status), SnsStatus::Success);

    let live = tokio::time::timeout(Duration::from_secs(2), alice_stream.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(live.msg, "live one");
    assert_eq!(live.timestamp, FOLLOW_AT + 100);
}

#[tokio::test]
async fn test_posts_before_follow_are_not_in_backlog() {
    let dir = tempdir().unwrap();
    let coord = start_coordinator(1).await;
    let node = start_node(node_config(&coord, 1, 1, dir.path())).await;
    let mut client = sns_client(&node.addr).await;

    for user in ["alice", "bob"] {
        client.login(request(user, &[])).await.unwrap();
    }
    for (content, at) in [("too early", FOLLOW_AT - 5), ("on time", FOLLOW_AT + 5)] {
        client
            .add_post(Request {
                username: "bob".into(),
                message: Some(message("bob", content, at)),
                ..Default::default()
            })
            .await
            .unwrap();
    }
    client.follow(follow_at("alice", "bob", FOLLOW_AT)).await.unwrap();

    let (tx, rx) = mpsc::channel(4);
    tx.send(message("alice", "", 0)).await.unwrap();
    let mut stream = client
        .timeline(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();

    let first = stream.message().await.unwrap().unwrap();
    assert_eq!(first.msg, "on time");
    let extra = tokio::time::timeout(Duration::from_millis(200), stream.message()).await;
    assert!(extra.is_err());
}

#[tokio::test]
async fn test_unfollow_then_refollow_backlog() {
    let dir = tempdir().unwrap();
    let coord = start_coordinator(1).await;
    let node = start_node(node_config(&coord, 1, 1, dir.path())).await;
    let mut client = sns_client(&node.addr).await;

    for user in ["alice", "bob"] {
        client.login(request(user, &[])).await.unwrap();
    }
    let bob_post = |content: &str, at: i64| Request {
        username: "bob".into(),
        message: Some(message("bob", content, at)),
        ..Default::default()
    };

    client.follow(follow_at("alice", "bob", FOLLOW_AT)).await.unwrap();
    client.add_post(bob_post("while following", FOLLOW_AT + 5)).await.unwrap();
    client.un_follow(request("alice", &["bob"])).await.unwrap();
    client.add_post(bob_post("while away", FOLLOW_AT + 10)).await.unwrap();

    // Unfollowed: joining yields nothing
    let (tx, rx) = mpsc::channel(4);
    tx.send(message("alice", "", 0)).await.unwrap();
    let mut stream = client
        .timeline(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();
    let extra = tokio::time::timeout(Duration::from_millis(200), stream.message()).await;
    assert!(extra.is_err());
    drop(tx);
    drop(stream);

    client.follow(follow_at("alice", "bob", FOLLOW_AT + 20)).await.unwrap();
    client.add_post(bob_post("after refollow", FOLLOW_AT + 25)).await.unwrap();

    let (tx, rx) = mpsc::channel(4);
    tx.send(message("alice", "", 0)).await.unwrap();
    let mut stream = client
        .timeline(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();
    let first = stream.message().await.unwrap().unwrap();
    assert_eq!(first.msg, "after refollow");
    let extra = tokio::time::timeout(Duration::from_millis(200), stream.message()).await;
    assert!(extra.is_err());
}

#[tokio::test]
async fn test_join_frame_content_is_not_posted() {
    let dir = tempdir().unwrap();
    let coord = start_coordinator(1).await;
    let node = start_node(node_config(&coord, 1, 1, dir.path())).await;
    let mut client = sns_client(&node.addr).await;
    client.login(request("bob", &[])).await.unwrap();

    let (tx, rx) = mpsc::channel(4);
    tx.send(message("bob", "join-with-text", FOLLOW_AT)).await.unwrap();
    tx.send(message("bob", "real post", FOLLOW_AT + 1)).await.unwrap();
    drop(tx);
    let mut stream = client
        .timeline(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();
    while stream.message().await.unwrap().is_some() {}

    let posts = std::fs::read_to_string(dir.path().join("c1s1/posts")).unwrap();
    assert!(!posts.contains("join-with-text"), "join frame stored: {:?}", posts);
    assert_eq!(posts.matches("W real post").count(), 1);
}

#[tokio::test]
async fn test_unknown_user_cannot_join_timeline() {
    let dir = tempdir().unwrap();
    let coord = start_coordinator(1).await;
    let node = start_node(node_config(&coord, 1, 1, dir.path())).await;
    let mut client = sns_client(&node.addr).await;

    let (tx, rx) = mpsc::channel(1);
    tx.send(message("ghost", "", 0)).await.unwrap();
    let mut stream = client
        .timeline(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();

    let err = stream.message().await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn test_client_library_round_trip() {
    let dir = tempdir().unwrap();
    let coord = start_coordinator(1).await;
    let _node = start_node(node_config(&coord, 1, 1, dir.path())).await;

    let config = ClientConfig {
        coordinator_addr: coord.addr.clone(),
        ..Default::default()
    };
    let mut alice = SnsClient::connect(&config, "alice").await.unwrap();
    let mut bob = SnsClient::connect(&config, "bob").await.unwrap();
    assert!(bob.client_id() > alice.client_id());

    assert_eq!(alice.login().await.unwrap().msg, "Login successful");
    assert_eq!(alice.login().await.unwrap().msg, "Welcome back");
    bob.login().await.unwrap();

    let missing = alice.follow("nobody").await.unwrap();
    assert_eq!(status_of(missing.status), SnsStatus::FailureNotExists);
    let own = alice.follow("alice").await.unwrap();
    assert_eq!(status_of(own.status), SnsStatus::FailureInvalid);
    let not_following = alice.unfollow("bob").await.unwrap();
    assert_eq!(status_of(not_following.status), SnsStatus::FailureNotAFollower);

    assert_eq!(status_of(alice.follow("bob").await.unwrap().status), SnsStatus::Success);
    let again = alice.follow("bob").await.unwrap();
    assert_eq!(status_of(again.status), SnsStatus::FailureAlreadyExists);

    let list = alice.list().await.unwrap();
    assert_eq!(list.all_users, vec!["alice", "bob"]);
    assert_eq!(list.following, vec!["bob"]);
    assert_eq!(bob.list().await.unwrap().followers, vec!["alice"]);

    let mut timeline = alice.timeline().await.unwrap();
    // The join frame is handled asynchronously after the call returns
    tokio::time::sleep(Duration::from_millis(300)).await;
    bob.post("multi\nline").await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), timeline.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(received.username, "bob");
    assert_eq!(received.msg, "multi line");
}
