//! Periodic fleet health polling.
//!
//! Sends a status query to every registered display on a fixed interval so
//! link states and last-known values stay fresh without any caller asking.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatch::CommandDispatcher;
use crate::endpoint::DisplayId;
use crate::message::{Command, CommandKind};

/// Counts from one polling round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polled: usize,
    pub reachable: usize,
}

#[derive(Debug)]
pub struct HealthMonitor {
    dispatcher: Arc<CommandDispatcher>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(dispatcher: Arc<CommandDispatcher>, interval: Duration) -> Self {
        Self {
            dispatcher,
            interval,
        }
    }

    /// One round: query every display, concurrently.
    pub async fn poll_once(&self) -> PollSummary {
        let targets: Vec<DisplayId> = self.dispatcher.registry().ids();
        if targets.is_empty() {
            return PollSummary::default();
        }
        let status_query = Command::new(targets[0].clone(), CommandKind::Status);
        let results = self.dispatcher.broadcast(&status_query, &targets).await;
        let summary = PollSummary {
            polled: results.len(),
            reachable: results.values().filter(|r| r.is_success()).count(),
        };
        if summary.reachable < summary.polled {
            tracing::warn!(
                polled = summary.polled,
                reachable = summary.reachable,
                "some displays did not answer the health check"
            );
        } else {
            tracing::debug!(polled = summary.polled, "health check complete");
        }
        summary
    }

    /// Poll until `shutdown` fires. The first round runs immediately.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval = ?self.interval, "health monitor started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                }
            }
            tracing::info!("health monitor stopped");
        })
    }
}
