//! Utility functions for tinysns

use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

/// Journal timestamp layout (always UTC, second precision)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Current time truncated to whole seconds
pub fn timestamp_now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// Unix seconds -> UTC datetime
pub fn timestamp_from_secs(secs: i64) -> crate::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| crate::Error::InvalidTimestamp(secs.to_string()))
}

/// Request timestamps of 0 mean "not set"; fall back to the local clock.
pub fn timestamp_or_now(secs: i64) -> DateTime<Utc> {
    if secs <= 0 {
        return timestamp_now();
    }
    timestamp_from_secs(secs).unwrap_or_else(|_| timestamp_now())
}

/// Format a timestamp for the durable logs
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp written by [`format_timestamp`]
pub fn parse_timestamp(s: &str) -> crate::Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| crate::Error::InvalidTimestamp(format!("{}: {}", s, e)))
}

/// Coordinator records store bare `host:port`; tonic wants a URI.
pub fn endpoint_uri(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// Open a channel with explicit connect and per-request deadlines
pub async fn connect_channel(
    addr: &str,
    connect_timeout: Duration,
    rpc_timeout: Duration,
) -> crate::Result<Channel> {
    let endpoint = Endpoint::from_shared(endpoint_uri(addr))
        .map_err(|e| crate::Error::InvalidConfig(format!("bad address {}: {}", addr, e)))?
        .connect_timeout(connect_timeout)
        .timeout(rpc_timeout);

    endpoint
        .connect()
        .await
        .map_err(|e| crate::Error::ConnectionFailed(format!("{}: {}", addr, e)))
}

/// Retry with exponential backoff
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    initial_delay: Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut delay = initial_delay;
    let attempts = max_retries + 1;

    for attempt in 0..attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                tracing::warn!(
                    "Retry attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_timestamp_format_roundtrip() {
        let ts = parse_timestamp("2024-01-01T00:00:00").unwrap();
        assert_eq!(ts.timestamp(), 1_704_067_200);
        assert_eq!(format_timestamp(&ts), "2024-01-01T00:00:00");
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        assert!(parse_timestamp("").is_err());
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_timestamp("2024-13-01T00:00:00").is_err());
    }

    #[test]
    fn test_timestamp_or_now() {
        assert_eq!(timestamp_or_now(20).timestamp(), 20);
        assert!(timestamp_or_now(0).timestamp() > 1_600_000_000);
    }

    #[test]
    fn test_endpoint_uri() {
        assert_eq!(endpoint_uri("localhost:10000"), "http://localhost:10000");
        assert_eq!(endpoint_uri("http://a:1"), "http://a:1");
    }

    #[tokio::test]
    async fn test_retry_stops_on_fatal_error() {
        let calls = AtomicUsize::new(0);
        let res: crate::Result<()> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(crate::Error::HeartbeatFailure("down".into())) }
            },
            3,
            Duration::from_millis(1),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicUsize::new(0);
        let res = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(crate::Error::ConnectionFailed("refused".into()))
                    } else {
                        Ok(n)
                    }
                }
            },
            2,
            Duration::from_millis(1),
        )
        .await;
        assert_eq!(res.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
