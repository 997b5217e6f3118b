//! Relay configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the connection registry and broadcaster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Grace window before a disconnected connection on a paused session is
    /// torn down, in seconds (default `120`).
    pub teardown_delay_secs: u64,
    /// Per-connection delivery queue capacity (default `64`). A full queue
    /// drops messages rather than backpressuring the publisher.
    pub send_queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            teardown_delay_secs: 120,
            send_queue_capacity: 64,
        }
    }
}

impl RelayConfig {
    /// Teardown grace window as a [`Duration`].
    #[must_use]
    pub fn teardown_delay(&self) -> Duration {
        Duration::from_secs(self.teardown_delay_secs)
    }
}
