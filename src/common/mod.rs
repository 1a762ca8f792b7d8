//! Common utilities and types shared across tinysns

pub mod config;
pub mod error;
pub mod utils;

pub use config::{ClientConfig, Config, CoordinatorConfig, LockStoreKind, NodeConfig};
pub use error::{Error, Result};
pub use utils::{
    connect_channel, endpoint_uri, format_timestamp, parse_timestamp, retry_with_backoff,
    timestamp_from_secs, timestamp_now, timestamp_or_now, TIMESTAMP_FORMAT,
};
