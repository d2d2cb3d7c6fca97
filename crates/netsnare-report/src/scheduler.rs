//! Background delivery loops.
//!
//! The heartbeat loop beats once shortly after startup and then on the
//! configured interval. The replay loop wakes every five minutes and only
//! touches the spool while report sends are failing. Both stop on the
//! daemon's shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::ReportClient;

/// Delay before the first heartbeat after startup.
const STARTUP_DELAY: Duration = Duration::from_secs(5);

/// How often the replay loop wakes.
pub const REPLAY_INTERVAL: Duration = Duration::from_secs(300);

/// Periodic heartbeat loop. Not started in offline mode.
pub async fn run_heartbeat_loop(
    client: Arc<ReportClient>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(?interval, "heartbeat loop started");

    tokio::select! {
        _ = tokio::time::sleep(STARTUP_DELAY) => client.heartbeat_cycle().await,
        _ = shutdown.changed() => {
            info!("heartbeat loop shutting down");
            return;
        }
    }

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                client.heartbeat_cycle().await;
            }
            _ = shutdown.changed() => {
                info!("heartbeat loop shutting down");
                break;
            }
        }
    }
}

/// Periodic spool replay loop; replays only while reports are failing.
pub async fn run_replay_loop(
    client: Arc<ReportClient>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if client.report_failures() == 0 {
                    continue;
                }
                match client.replay_spool().await {
                    Ok(stats) if stats.attempted > 0 => {
                        info!(uploaded = stats.uploaded, remaining = stats.remaining, "replay pass done");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "spool replay failed"),
                }
            }
            _ = shutdown.changed() => {
                info!("replay loop shutting down");
                break;
            }
        }
    }
}
