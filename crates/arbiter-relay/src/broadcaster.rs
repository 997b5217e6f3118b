//! Event fan-out to subscribed connections.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use arbiter_core::{ConnectionId, Outbound};

use crate::registry::ConnectionRegistry;

/// Fans [`Outbound`] envelopes out to every subscriber of their target
/// channels.
///
/// The event is serialized once and shared; a connection subscribed to
/// several target channels (its own user channel plus the match channel)
/// receives the event exactly once. Delivery is at-most-once: a full queue
/// drops the message, bumps the counters, and the publisher never learns.
pub struct EventBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl EventBroadcaster {
    /// Create a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver an envelope to the union of its channels' subscribers.
    /// Returns the number of connections reached.
    pub fn publish(&self, outbound: &Outbound) -> usize {
        let event_type = outbound.event.event_type();
        let json = match serde_json::to_string(&outbound.event) {
            Ok(json) => Arc::new(json),
            Err(error) => {
                warn!(event_type, %error, "failed to serialize event");
                return 0;
            }
        };

        let mut seen: HashSet<ConnectionId> = HashSet::new();
        let mut reached = 0;
        for channel in &outbound.channels {
            for connection in self.registry.subscribers(channel) {
                if !seen.insert(connection.id.clone()) {
                    continue;
                }
                if connection.send(json.clone()) {
                    reached += 1;
                } else {
                    counter!("relay_dropped_messages").increment(1);
                    warn!(conn_id = %connection.id, channel = %channel, event_type,
                        "failed to deliver event");
                }
            }
        }
        debug!(event_type, recipients = seen.len(), reached, "event published");
        reached
    }
}
