//! Periodic clock housekeeping.
//!
//! Flag fall is a wall-clock fact, not something a player reports, so a
//! ticker polls the manager on a fixed cadence. Each pass also applies the
//! inactivity and abandonment thresholds. Ticks only observe elapsed time;
//! clock correctness never depends on the cadence.

use std::sync::Arc;

use chrono::Utc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::manager::SessionManager;

/// Outcome of the ticker loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickerResult {
    /// The ticker was cancelled externally.
    Cancelled,
}

/// Drives [`SessionManager::tick`] at the configured interval.
pub struct ClockTicker {
    manager: Arc<SessionManager>,
}

impl ClockTicker {
    /// Create a ticker over a manager.
    #[must_use]
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Run until cancelled. The interval comes from the manager's
    /// configuration; a missed tick burst collapses into one late pass.
    pub async fn run(self, cancel: CancellationToken) -> TickerResult {
        let mut interval = time::interval(self.manager.config().tick_interval());
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let transitions = self.manager.tick(Utc::now());
                    if transitions > 0 {
                        debug!(transitions, "tick applied transitions");
                    }
                }
                () = cancel.cancelled() => {
                    return TickerResult::Cancelled;
                }
            }
        }
    }
}
