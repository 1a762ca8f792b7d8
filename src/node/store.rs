//! In-memory social graph and post history of a replica node
//!
//! Every mutation is journaled before it returns. Users live in an
//! append-only table addressed by [`UserId`]; relationships reference
//! users by id so a follower's view never holds a dangling name.

use crate::common::Result;
use crate::node::journal::{self, Journal, RelationshipEntry};
use crate::proto;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tonic::Status;

/// Outbound half of an open timeline stream
pub type TimelineSender = mpsc::Sender<std::result::Result<proto::Message, Status>>;

/// Index into the user table
pub type UserId = usize;

/// A single post, as journaled and as streamed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub author: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Post {
    /// Build a post, flattening newlines so the post log stays line-oriented.
    pub fn new(author: impl Into<String>, content: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            author: author.into(),
            content: content.replace(['\r', '\n'], " "),
            timestamp,
        }
    }

    pub fn to_message(&self) -> proto::Message {
        proto::Message {
            username: self.author.clone(),
            msg: self.content.clone(),
            timestamp: self.timestamp.timestamp(),
        }
    }
}

#[derive(Debug)]
pub struct User {
    pub username: String,
    pub connected: bool,
    /// Followees with the time the follow happened
    pub following: Vec<(UserId, DateTime<Utc>)>,
    pub followers: Vec<UserId>,
    stream: Option<TimelineSender>,
}

impl User {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            connected: false,
            following: Vec::new(),
            followers: Vec::new(),
            stream: None,
        }
    }

    fn follows(&self, id: UserId) -> Option<DateTime<Utc>> {
        self.following
            .iter()
            .find(|(followee, _)| *followee == id)
            .map(|(_, at)| *at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Registered,
    Returning,
    InvalidName,
}

/// Why a relationship change was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    UnknownUser,
    UnknownTarget,
    SelfTarget,
    AlreadyFollowing,
    NotFollowing,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::UnknownUser => "requesting user does not exist",
            Self::UnknownTarget => "target user does not exist",
            Self::SelfTarget => "cannot target yourself",
            Self::AlreadyFollowing => "already following",
            Self::NotFollowing => "not following",
        };
        f.write_str(text)
    }
}

/// Result of `List` for one user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub all_users: Vec<String>,
    pub followers: Vec<String>,
    pub following: Vec<String>,
}

/// Usernames go verbatim into space-separated log lines.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

#[derive(Debug)]
pub struct SocialStore {
    users: Vec<User>,
    index: HashMap<String, UserId>,
    posts: Vec<Post>,
    journal: Journal,
}

impl SocialStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            users: Vec::new(),
            index: HashMap::new(),
            posts: Vec::new(),
            journal,
        }
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.index.get(name).map(|&id| &self.users[id])
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn login(&mut self, username: &str) -> Result<LoginOutcome> {
        if !is_valid_username(username) {
            return Ok(LoginOutcome::InvalidName);
        }
        if self.index.contains_key(username) {
            return Ok(LoginOutcome::Returning);
        }
        self.register(username, true)?;
        Ok(LoginOutcome::Registered)
    }

    fn register(&mut self, username: &str, persist: bool) -> Result<UserId> {
        if let Some(&id) = self.index.get(username) {
            return Ok(id);
        }
        if persist {
            self.journal.append_relationship(&RelationshipEntry::User {
                name: username.to_string(),
            })?;
        }
        let id = self.users.len();
        self.users.push(User::new(username));
        self.index.insert(username.to_string(), id);
        Ok(id)
    }

    fn resolve_pair(
        &self,
        follower: &str,
        followee: &str,
    ) -> std::result::Result<(UserId, UserId), Rejection> {
        let &a = self.index.get(follower).ok_or(Rejection::UnknownUser)?;
        let &b = self.index.get(followee).ok_or(Rejection::UnknownTarget)?;
        if a == b {
            return Err(Rejection::SelfTarget);
        }
        Ok((a, b))
    }

    /// Make `follower` follow `followee` as of `at`.
    pub fn follow(
        &mut self,
        follower: &str,
        followee: &str,
        at: DateTime<Utc>,
    ) -> Result<std::result::Result<(), Rejection>> {
        self.apply_follow(follower, followee, at, true)
    }

    fn apply_follow(
        &mut self,
        follower: &str,
        followee: &str,
        at: DateTime<Utc>,
        persist: bool,
    ) -> Result<std::result::Result<(), Rejection>> {
        let (a, b) = match self.resolve_pair(follower, followee) {
            Ok(pair) => pair,
            Err(rejection) => return Ok(Err(rejection)),
        };
        if self.users[a].follows(b).is_some() {
            return Ok(Err(Rejection::AlreadyFollowing));
        }

        if persist {
            self.journal.append_relationship(&RelationshipEntry::Follow {
                follower: follower.to_string(),
                followee: followee.to_string(),
                at,
            })?;
        }
        self.users[a].following.push((b, at));
        self.users[b].followers.push(a);
        Ok(Ok(()))
    }

    pub fn unfollow(
        &mut self,
        follower: &str,
        followee: &str,
    ) -> Result<std::result::Result<(), Rejection>> {
        self.apply_unfollow(follower, followee, true)
    }

    fn apply_unfollow(
        &mut self,
        follower: &str,
        followee: &str,
        persist: bool,
    ) -> Result<std::result::Result<(), Rejection>> {
        let (a, b) = match self.resolve_pair(follower, followee) {
            Ok(pair) => pair,
            Err(rejection) => return Ok(Err(rejection)),
        };
        if self.users[a].follows(b).is_none() {
            return Ok(Err(Rejection::NotFollowing));
        }

        if persist {
            self.journal.append_relationship(&RelationshipEntry::Unfollow {
                follower: follower.to_string(),
                followee: followee.to_string(),
            })?;
        }
        self.users[a].following.retain(|(id, _)| *id != b);
        self.users[b].followers.retain(|id| *id != a);
        Ok(Ok(()))
    }

    /// All users in registration order plus the requester's own edges.
    pub fn list(&self, username: &str) -> Option<Listing> {
        let user = self.user(username)?;
        let name_of = |id: &UserId| self.users[*id].username.clone();
        Some(Listing {
            all_users: self.users.iter().map(|u| u.username.clone()).collect(),
            followers: user.followers.iter().map(name_of).collect(),
            following: user.following.iter().map(|(id, _)| name_of(id)).collect(),
        })
    }

    /// Store and journal a post, then push it to followers with an open
    /// timeline. Returns the number of live deliveries.
    ///
    /// Posts by unknown authors are stored but reach nobody.
    pub fn add_post(&mut self, post: Post) -> Result<usize> {
        self.journal.append_post(&post)?;
        let delivered = self.fan_out(&post);
        self.posts.push(post);
        Ok(delivered)
    }

    fn fan_out(&self, post: &Post) -> usize {
        let Some(&author) = self.index.get(&post.author) else {
            return 0;
        };
        let message = post.to_message();
        let mut delivered = 0;

        for &follower in &self.users[author].followers {
            if follower == author {
                continue;
            }
            let user = &self.users[follower];
            let Some(stream) = &user.stream else {
                continue;
            };
            match stream.try_send(Ok(message.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Timeline of {} is full, dropping post from {}",
                        user.username,
                        post.author
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Timeline of {} already closed", user.username);
                }
            }
        }
        delivered
    }

    /// Up to `limit` posts by `username`'s followees made strictly after
    /// the respective follow, newest first.
    pub fn backlog(&self, username: &str, limit: usize) -> Vec<Post> {
        let Some(user) = self.user(username) else {
            return Vec::new();
        };

        let mut selected = Vec::new();
        for post in self.posts.iter().rev() {
            if selected.len() >= limit {
                break;
            }
            let Some(&author) = self.index.get(&post.author) else {
                continue;
            };
            if let Some(followed_at) = user.follows(author) {
                if post.timestamp > followed_at {
                    selected.push(post.clone());
                }
            }
        }
        selected
    }

    /// Bind `sender` as `username`'s live timeline, after queueing the
    /// backlog on it. Both happen under the store lock, so no live post
    /// can overtake the backlog. Returns `false` for an unknown user.
    pub fn open_timeline(&mut self, username: &str, sender: TimelineSender, limit: usize) -> bool {
        let Some(&id) = self.index.get(username) else {
            return false;
        };

        for post in self.backlog(username, limit) {
            if sender.try_send(Ok(post.to_message())).is_err() {
                tracing::warn!("Backlog for {} truncated", username);
                break;
            }
        }

        let user = &mut self.users[id];
        user.stream = Some(sender);
        user.connected = true;
        true
    }

    /// Unbind a timeline, unless a newer stream has replaced it.
    pub fn close_timeline(&mut self, username: &str, sender: &TimelineSender) {
        let Some(&id) = self.index.get(username) else {
            return;
        };
        let user = &mut self.users[id];
        if user
            .stream
            .as_ref()
            .is_some_and(|current| current.same_channel(sender))
        {
            user.stream = None;
            user.connected = false;
        }
    }

    /// Raw journal content for a syncing sibling
    pub fn log_snapshot(&self) -> Result<(String, String)> {
        self.journal.read_all()
    }

    /// Rebuild state from this node's own journal.
    pub fn restore_local(&mut self) -> Result<()> {
        let (relationships, posts) = self.journal.read_all()?;
        self.replay(&relationships, &posts, false)
    }

    /// Replace this node's journal and in-memory state with a peer's.
    pub fn restore_from(&mut self, relationships: &str, posts: &str) -> Result<()> {
        self.journal.reset()?;
        self.users.clear();
        self.index.clear();
        self.posts.clear();
        self.replay(relationships, posts, true)?;
        self.journal.sync()
    }

    fn replay(&mut self, relationships: &str, posts: &str, persist: bool) -> Result<()> {
        journal::replay_relationships(relationships, |entry| {
            let outcome = match &entry {
                RelationshipEntry::User { name } => {
                    self.register(name, persist)?;
                    Ok(())
                }
                RelationshipEntry::Follow {
                    follower,
                    followee,
                    at,
                } => self.apply_follow(follower, followee, *at, persist)?,
                RelationshipEntry::Unfollow { follower, followee } => {
                    self.apply_unfollow(follower, followee, persist)?
                }
            };
            if let Err(rejection) = outcome {
                tracing::warn!("Ignoring journal entry '{}': {}", entry, rejection);
            }
            Ok(())
        })?;

        journal::replay_posts(posts, |post| {
            if persist {
                self.journal.append_post(&post)?;
            }
            self.posts.push(post);
            Ok(())
        })?;

        tracing::info!(
            "Restored {} users and {} posts",
            self.users.len(),
            self.posts.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::parse_timestamp;
    use tempfile::{tempdir, TempDir};

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_704_067_200 + secs, 0).unwrap()
    }

    fn store() -> (TempDir, SocialStore) {
        let dir = tempdir().unwrap();
        let journal = Journal::open(dir.path().join("c1s1")).unwrap();
        (dir, SocialStore::new(journal))
    }

    fn with_users(names: &[&str]) -> (TempDir, SocialStore) {
        let (dir, mut store) = store();
        for name in names {
            store.login(name).unwrap();
        }
        (dir, store)
    }

    #[test]
    fn test_login() {
        let (_dir, mut store) = store();
        assert_eq!(store.login("alice").unwrap(), LoginOutcome::Registered);
        assert_eq!(store.login("alice").unwrap(), LoginOutcome::Returning);
        assert_eq!(store.login("").unwrap(), LoginOutcome::InvalidName);
        assert_eq!(store.login("bad name").unwrap(), LoginOutcome::InvalidName);
        assert_eq!(store.num_users(), 1);

        let (relationships, _) = store.log_snapshot().unwrap();
        assert_eq!(relationships, "USER alice\n");
    }

    #[test]
    fn test_follow_rules() {
        let (_dir, mut store) = with_users(&["alice", "bob"]);

        assert_eq!(store.follow("alice", "bob", at(0)).unwrap(), Ok(()));
        assert_eq!(
            store.follow("alice", "bob", at(1)).unwrap(),
            Err(Rejection::AlreadyFollowing)
        );
        assert_eq!(
            store.follow("alice", "alice", at(1)).unwrap(),
            Err(Rejection::SelfTarget)
        );
        assert_eq!(
            store.follow("alice", "zed", at(1)).unwrap(),
            Err(Rejection::UnknownTarget)
        );
        assert_eq!(
            store.follow("zed", "alice", at(1)).unwrap(),
            Err(Rejection::UnknownUser)
        );

        let alice = store.list("alice").unwrap();
        assert_eq!(alice.following, vec!["bob"]);
        assert!(alice.followers.is_empty());
        let bob = store.list("bob").unwrap();
        assert_eq!(bob.followers, vec!["alice"]);
        assert_eq!(bob.all_users, vec!["alice", "bob"]);
        assert!(store.list("zed").is_none());
    }

    #[test]
    fn test_unfollow_rules() {
        let (_dir, mut store) = with_users(&["alice", "bob"]);

        assert_eq!(
            store.unfollow("alice", "bob").unwrap(),
            Err(Rejection::NotFollowing)
        );
        store.follow("alice", "bob", at(0)).unwrap().unwrap();
        assert_eq!(store.unfollow("alice", "bob").unwrap(), Ok(()));
        assert!(store.list("alice").unwrap().following.is_empty());
        assert!(store.list("bob").unwrap().followers.is_empty());

        let (relationships, _) = store.log_snapshot().unwrap();
        assert_eq!(
            relationships,
            "USER alice\nUSER bob\nFOLLOW alice bob 2024-01-01T00:00:00\nUNFOLLOW alice bob\n"
        );
    }

    #[test]
    fn test_post_flattens_newlines() {
        let post = Post::new("bob", "line one\nline two", at(0));
        assert_eq!(post.content, "line one line two");
    }

    #[test]
    fn test_backlog_excludes_posts_before_follow() {
        let (_dir, mut store) = with_users(&["alice", "bob"]);
        store.add_post(Post::new("bob", "old", at(-10))).unwrap();
        store.follow("alice", "bob", at(0)).unwrap().unwrap();
        // Same second as the follow is not "after" it
        store.add_post(Post::new("bob", "tie", at(0))).unwrap();
        store.add_post(Post::new("bob", "new", at(20))).unwrap();

        let backlog = store.backlog("alice", 20);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].content, "new");
        assert!(store.backlog("bob", 20).is_empty());
        assert!(store.backlog("nobody", 20).is_empty());
    }

    #[test]
    fn test_backlog_caps_and_orders_newest_first() {
        let (_dir, mut store) = with_users(&["alice", "bob", "carol"]);
        store.follow("alice", "bob", at(0)).unwrap().unwrap();
        store.follow("alice", "carol", at(0)).unwrap().unwrap();
        for i in 1..=25 {
            let author = if i % 2 == 0 { "bob" } else { "carol" };
            store
                .add_post(Post::new(author, &format!("post {}", i), at(i)))
                .unwrap();
        }

        let backlog = store.backlog("alice", 20);
        assert_eq!(backlog.len(), 20);
        assert_eq!(backlog[0].content, "post 25");
        assert_eq!(backlog[19].content, "post 6");
        assert!(backlog.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
    }

    #[test]
    fn test_unfollow_drops_backlog() {
        let (_dir, mut store) = with_users(&["alice", "bob"]);
        store.follow("alice", "bob", at(0)).unwrap().unwrap();
        store.add_post(Post::new("bob", "hello", at(5))).unwrap();
        assert_eq!(store.backlog("alice", 20).len(), 1);

        store.unfollow("alice", "bob").unwrap().unwrap();
        assert!(store.backlog("alice", 20).is_empty());
    }

    #[test]
    fn test_refollow_uses_new_follow_time() {
        let (_dir, mut store) = with_users(&["alice", "bob"]);
        store.follow("alice", "bob", at(0)).unwrap().unwrap();
        store.add_post(Post::new("bob", "while following", at(5))).unwrap();
        store.unfollow("alice", "bob").unwrap().unwrap();
        store.add_post(Post::new("bob", "while away", at(10))).unwrap();

        store.follow("alice", "bob", at(20)).unwrap().unwrap();
        store.add_post(Post::new("bob", "after refollow", at(25))).unwrap();

        let backlog = store.backlog("alice", 20);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].content, "after refollow");
        assert!(backlog.iter().all(|p| p.timestamp > at(20)));
    }

    #[tokio::test]
    async fn test_live_fan_out() {
        let (_dir, mut store) = with_users(&["alice", "bob", "carol"]);
        store.follow("alice", "bob", at(0)).unwrap().unwrap();
        store.follow("carol", "bob", at(0)).unwrap().unwrap();

        let (alice_tx, mut alice_rx) = mpsc::channel(8);
        assert!(store.open_timeline("alice", alice_tx, 20));
        assert!(store.user("alice").unwrap().connected);

        let (carol_tx, carol_rx) = mpsc::channel(8);
        assert!(store.open_timeline("carol", carol_tx, 20));
        drop(carol_rx);

        let delivered = store.add_post(Post::new("bob", "live", at(30))).unwrap();
        assert_eq!(delivered, 1);

        let message = alice_rx.recv().await.unwrap().unwrap();
        assert_eq!(message.username, "bob");
        assert_eq!(message.msg, "live");
        assert_eq!(message.timestamp, at(30).timestamp());

        // Unknown author: stored, no fan-out
        assert_eq!(store.add_post(Post::new("ghost", "boo", at(31))).unwrap(), 0);
        assert_eq!(store.posts().len(), 2);
    }

    #[tokio::test]
    async fn test_open_timeline_queues_backlog_first() {
        let (_dir, mut store) = with_users(&["alice", "bob"]);
        store.follow("alice", "bob", at(0)).unwrap().unwrap();
        store.add_post(Post::new("bob", "first", at(1))).unwrap();
        store.add_post(Post::new("bob", "second", at(2))).unwrap();

        let (tx, mut rx) = mpsc::channel(32);
        assert!(!store.open_timeline("nobody", tx.clone(), 20));
        assert!(store.open_timeline("alice", tx.clone(), 20));
        store.add_post(Post::new("bob", "third", at(3))).unwrap();

        let order: Vec<String> = (0..3)
            .map(|_| rx.try_recv().unwrap().unwrap().msg)
            .collect();
        assert_eq!(order, vec!["second", "first", "third"]);
    }

    #[test]
    fn test_close_timeline_keeps_newer_stream() {
        let (_dir, mut store) = with_users(&["alice"]);
        let (old_tx, _old_rx) = mpsc::channel(1);
        let (new_tx, _new_rx) = mpsc::channel(1);

        store.open_timeline("alice", old_tx.clone(), 20);
        store.open_timeline("alice", new_tx.clone(), 20);
        store.close_timeline("alice", &old_tx);
        assert!(store.user("alice").unwrap().connected);

        store.close_timeline("alice", &new_tx);
        assert!(!store.user("alice").unwrap().connected);
    }

    #[test]
    fn test_restore_local_rebuilds_state() {
        let dir = tempdir().unwrap();
        {
            let mut store = SocialStore::new(Journal::open(dir.path()).unwrap());
            store.login("alice").unwrap();
            store.login("bob").unwrap();
            store.follow("alice", "bob", at(0)).unwrap().unwrap();
            store.add_post(Post::new("bob", "persisted", at(20))).unwrap();
        }

        let mut store = SocialStore::new(Journal::open(dir.path()).unwrap());
        store.restore_local().unwrap();
        assert_eq!(store.num_users(), 2);
        assert_eq!(store.list("alice").unwrap().following, vec!["bob"]);
        assert_eq!(store.backlog("alice", 20)[0].content, "persisted");

        // Restoring does not duplicate journal content
        let (relationships, posts) = store.log_snapshot().unwrap();
        assert_eq!(relationships.lines().count(), 3);
        assert_eq!(posts.matches("\nW ").count(), 1);
    }

    #[test]
    fn test_restore_from_peer_replaces_journal() {
        let (_dir, mut store) = with_users(&["stale"]);
        let relationships = "USER alice\nUSER bob\nFOLLOW alice bob 2024-01-01T00:00:00\n";
        let posts = "T 2024-01-01T00:00:20\nU bob\nW hello\n\n";

        store.add_post(Post::new("stale", "old news", at(1))).unwrap();

        store.restore_from(relationships, posts).unwrap();
        let (own_relationships, own_posts) = store.log_snapshot().unwrap();
        assert_eq!(own_relationships, relationships);
        assert_eq!(own_posts, posts);

        assert!(store.user("stale").is_none());
        assert_eq!(store.num_users(), 2);
        assert_eq!(store.posts().len(), 1);
        assert_eq!(store.list("alice").unwrap().all_users, vec!["alice", "bob"]);

        let backlog = store.backlog("alice", 20);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].timestamp, ts("2024-01-01T00:00:20"));
    }

    #[test]
    fn test_replay_skips_inconsistent_entries() {
        let (_dir, mut store) = store();
        let relationships = "USER alice\nFOLLOW alice ghost 2024-01-01T00:00:00\nUNFOLLOW alice alice\n";
        store.restore_from(relationships, "").unwrap();
        assert_eq!(store.num_users(), 1);

        let (own_relationships, _) = store.log_snapshot().unwrap();
        assert_eq!(own_relationships, "USER alice\n");
    }
}
