//! Durable append-only logs of a replica node
//!
//! Two plain-text files per node:
//!
//! ```text
//! userinfo                          posts
//! USER alice                        T 2024-01-01T00:00:20
//! USER bob                          U bob
//! FOLLOW alice bob 2024-01-01T...   W hello
//! UNFOLLOW alice bob                <empty line>
//! ```
//!
//! Replay applies entries strictly in file order. Malformed relationship
//! lines and incomplete post blocks (a crash mid-append) are skipped.

use crate::common::{format_timestamp, parse_timestamp, Error, Result};
use crate::node::store::Post;
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const RELATIONSHIP_LOG: &str = "userinfo";
const POST_LOG: &str = "posts";

const OP_USER: &str = "USER";
const OP_FOLLOW: &str = "FOLLOW";
const OP_UNFOLLOW: &str = "UNFOLLOW";

/// One line of the relationship log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipEntry {
    User {
        name: String,
    },
    Follow {
        follower: String,
        followee: String,
        at: DateTime<Utc>,
    },
    Unfollow {
        follower: String,
        followee: String,
    },
}

impl RelationshipEntry {
    pub fn parse(line: &str) -> Result<Self> {
        let args: Vec<&str> = line.split_whitespace().collect();
        match args.as_slice() {
            [OP_USER, name] => Ok(Self::User {
                name: name.to_string(),
            }),
            [OP_FOLLOW, follower, followee, at] => Ok(Self::Follow {
                follower: follower.to_string(),
                followee: followee.to_string(),
                at: parse_timestamp(at)?,
            }),
            [OP_UNFOLLOW, follower, followee] => Ok(Self::Unfollow {
                follower: follower.to_string(),
                followee: followee.to_string(),
            }),
            _ => Err(Error::Journal(format!("unrecognized relationship line: {:?}", line))),
        }
    }
}

impl std::fmt::Display for RelationshipEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User { name } => write!(f, "{} {}", OP_USER, name),
            Self::Follow {
                follower,
                followee,
                at,
            } => write!(
                f,
                "{} {} {} {}",
                OP_FOLLOW,
                follower,
                followee,
                format_timestamp(at)
            ),
            Self::Unfollow { follower, followee } => {
                write!(f, "{} {} {}", OP_UNFOLLOW, follower, followee)
            }
        }
    }
}

/// Serialize a post as a `T/U/W` block, blank line included
pub fn format_post(post: &Post) -> String {
    format!(
        "T {}\nU {}\nW {}\n\n",
        format_timestamp(&post.timestamp),
        post.author,
        post.content
    )
}

fn parse_post_block(block: &str) -> Result<Post> {
    let mut timestamp = None;
    let mut author = None;
    let mut content = None;

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("T ") {
            timestamp = Some(parse_timestamp(rest)?);
        } else if let Some(rest) = line.strip_prefix("U ") {
            author = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("W ") {
            content = Some(rest.to_string());
        } else if line == "W" {
            content = Some(String::new());
        }
    }

    match (timestamp, author, content) {
        (Some(timestamp), Some(author), Some(content)) if !author.is_empty() => Ok(Post {
            author,
            content,
            timestamp,
        }),
        _ => Err(Error::Journal(format!("incomplete post block: {:?}", block))),
    }
}

/// Replay relationship log content in order.
pub fn replay_relationships<F>(data: &str, mut callback: F) -> Result<()>
where
    F: FnMut(RelationshipEntry) -> Result<()>,
{
    for line in data.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match RelationshipEntry::parse(line) {
            Ok(entry) => callback(entry)?,
            Err(e) => tracing::warn!("Skipping relationship log line: {}", e),
        }
    }
    Ok(())
}

/// Replay post log content in order.
pub fn replay_posts<F>(data: &str, mut callback: F) -> Result<()>
where
    F: FnMut(Post) -> Result<()>,
{
    for block in data.split("\n\n") {
        if block.trim().is_empty() {
            continue;
        }
        match parse_post_block(block) {
            Ok(post) => callback(post)?,
            Err(e) => tracing::warn!("Skipping post log block: {}", e),
        }
    }
    Ok(())
}

/// Append-only journal files of one node
#[derive(Debug)]
pub struct Journal {
    dir: PathBuf,
    relationships: File,
    posts: File,
}

impl Journal {
    /// Open (or create) both logs under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let relationships = Self::open_append(&dir.join(RELATIONSHIP_LOG))?;
        let posts = Self::open_append(&dir.join(POST_LOG))?;

        Ok(Self {
            dir,
            relationships,
            posts,
        })
    }

    fn open_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?)
    }

    pub fn append_relationship(&mut self, entry: &RelationshipEntry) -> Result<()> {
        let line = format!("{}\n", entry);
        self.relationships.write_all(line.as_bytes())?;
        self.relationships.flush()?;
        Ok(())
    }

    pub fn append_post(&mut self, post: &Post) -> Result<()> {
        self.posts.write_all(format_post(post).as_bytes())?;
        self.posts.flush()?;
        Ok(())
    }

    /// Full content of (relationship log, post log)
    pub fn read_all(&self) -> Result<(String, String)> {
        let relationships = std::fs::read_to_string(self.dir.join(RELATIONSHIP_LOG))?;
        let posts = std::fs::read_to_string(self.dir.join(POST_LOG))?;
        Ok((relationships, posts))
    }

    /// Drop both logs' content; used before syncing from a peer.
    pub fn reset(&mut self) -> Result<()> {
        self.relationships.set_len(0)?;
        self.posts.set_len(0)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.relationships.sync_all()?;
        self.posts.sync_all()?;
        Ok(())
    }
}
