//! Connection Health
//!
//! Health record for the client's active connection and the periodic task that
//! refreshes it.
//! Features:
//! - Latency tracking with a moving average
//! - Degraded status on latency spikes
//! - Reconnect on unhealthy checks

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::McpClient;

/// Health status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Server is responding normally
    Healthy,
    /// Server is responding but with degraded performance
    Degraded,
    /// Server is not responding
    Unhealthy,
    /// Health status is unknown (never checked)
    Unknown,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// Health information for the active connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub status: HealthStatus,
    /// Latency of the last check in milliseconds
    pub latency_ms: Option<u64>,
    /// Average latency over recent checks
    pub avg_latency_ms: Option<u64>,
    /// Last check timestamp (RFC3339)
    pub last_check: Option<String>,
    /// Last error message if unhealthy
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl ConnectionHealth {
    pub fn record_success(&mut self, latency_ms: u64) {
        self.status = HealthStatus::Healthy;
        self.latency_ms = Some(latency_ms);
        self.last_check = Some(chrono::Utc::now().to_rfc3339());
        self.last_error = None;
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;

        let avg = match self.avg_latency_ms {
            Some(avg) => (avg * 4 + latency_ms) / 5,
            None => latency_ms,
        };
        self.avg_latency_ms = Some(avg);

        // Latency spike: more than twice the average and over a second
        if latency_ms > avg * 2 && latency_ms > 1000 {
            self.status = HealthStatus::Degraded;
        }
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.status = HealthStatus::Unhealthy;
        self.latency_ms = None;
        self.last_check = Some(chrono::Utc::now().to_rfc3339());
        self.last_error = Some(error.into());
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

/// Periodically check the client's connection until the client is dropped or
/// the task is aborted
pub(crate) fn spawn_monitor(client: Weak<McpClient>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(client) = client.upgrade() else {
                debug!("Client dropped; health monitor exiting");
                break;
            };
            if !client.state().is_connected() {
                continue;
            }

            let health = client.check_health().await;
            if health.status == HealthStatus::Unhealthy {
                warn!(
                    "Connection unhealthy ({} consecutive failures), reconnecting",
                    health.consecutive_failures
                );
                if let Err(e) = client.reconnect().await {
                    warn!("Reconnect after failed health check did not succeed: {}", e);
                }
            }
        }
    })
}
