//! Event bridge between the session manager's broadcast channel and the
//! per-connection fan-out.

use std::sync::Arc;

use tokio::sync::broadcast;

use arbiter_core::Outbound;

use crate::broadcaster::EventBroadcaster;

/// Drains the manager's outbound stream into the broadcaster.
pub struct EventBridge {
    rx: broadcast::Receiver<Outbound>,
    broadcaster: Arc<EventBroadcaster>,
}

impl EventBridge {
    /// Create a new bridge over a subscription.
    pub fn new(rx: broadcast::Receiver<Outbound>, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { rx, broadcaster }
    }

    /// Run the bridge loop. Exits when the broadcast sender is dropped.
    /// Lagging never loses more than the channel's backlog; the skipped
    /// envelopes are logged and delivery continues from the live edge.
    #[tracing::instrument(skip_all, name = "event_bridge")]
    pub async fn run(mut self) {
        loop {
            match self.rx.recv().await {
                Ok(outbound) => {
                    tracing::debug!(
                        event_type = outbound.event.event_type(),
                        "bridging event to clients"
                    );
                    let _ = self.broadcaster.publish(&outbound);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event bridge: sender closed, exiting");
                    break;
                }
            }
        }
    }
}
