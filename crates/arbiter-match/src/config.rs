//! Match layer configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the session manager and clock ticker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Clock tick interval in milliseconds (default `100`).
    pub tick_interval_ms: u64,
    /// Inactivity beyond this many seconds pauses an active session
    /// (default `600`).
    pub inactivity_pause_secs: u64,
    /// A paused session whose absent participant never returns within this
    /// many seconds is forfeited by abandonment (default `3600`).
    pub abandonment_ceiling_secs: u64,
    /// Draw offer TTL in seconds (default `300`).
    pub draw_offer_ttl_secs: u64,
    /// Resume request TTL in seconds (default `300`).
    pub resume_request_ttl_secs: u64,
    /// Challenge / invitation TTL in seconds (default `86400`).
    pub challenge_ttl_secs: u64,
}

impl MatchConfig {
    /// Tick interval as a [`Duration`].
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            inactivity_pause_secs: 600,
            abandonment_ceiling_secs: 3600,
            draw_offer_ttl_secs: 300,
            resume_request_ttl_secs: 300,
            challenge_ttl_secs: 86_400,
        }
    }
}
