//! Background heartbeat monitor

use crate::coordinator::registry::ClusterRegistry;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Run [`ClusterRegistry::check_heartbeats`] every `interval` until the task is aborted.
pub fn start_heartbeat_monitor(
    registry: Arc<Mutex<ClusterRegistry>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let report = {
                let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
                registry.check_heartbeats(Instant::now())
            };

            if !report.demoted.is_empty() {
                tracing::info!("Heartbeat monitor demoted {} node(s)", report.demoted.len());
            }
        }
    })
}
