//! Connection registry with delayed teardown.
//!
//! A dropped transport does not always mean the player left: on a paused
//! session the registry keeps the connection entry (and its subscriptions)
//! soft-open for a grace window so a quick reconnect resumes delivery
//! without re-subscribing. A second disconnect within the window supersedes
//! the previous timer rather than stacking a second one.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use arbiter_core::{Channel, ConnectionId, UserId};

use crate::config::RelayConfig;
use crate::connection::ClientConnection;

/// Registry of live and soft-open connections.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    pending: DashMap<ConnectionId, CancellationToken>,
    config: RelayConfig,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            connections: DashMap::new(),
            pending: DashMap::new(),
            config,
        }
    }

    /// The registry's configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Register a new connection for a user. The queue is the seam to the
    /// transport's write task.
    pub fn register(&self, user_id: UserId, tx: mpsc::Sender<Arc<String>>) -> Arc<ClientConnection> {
        let connection = Arc::new(ClientConnection::new(ConnectionId::new(), user_id, tx));
        let _ = self
            .connections
            .insert(connection.id.clone(), connection.clone());
        gauge!("relay_connections").set(approx_f64(self.connections.len()));
        debug!(conn_id = %connection.id, user_id = %connection.user_id, "connection registered");
        connection
    }

    /// A connection by ID, live or soft-open.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|entry| entry.clone())
    }

    /// Number of registered connections, soft-open included.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether a teardown timer is armed for a connection.
    #[must_use]
    pub fn has_pending_teardown(&self, id: &ConnectionId) -> bool {
        self.pending.contains_key(id)
    }

    /// Every connection subscribed to a channel.
    #[must_use]
    pub fn subscribers(&self, channel: &Channel) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .filter(|entry| entry.is_subscribed(channel))
            .map(|entry| entry.clone())
            .collect()
    }

    /// Handle a dropped transport. On a paused session the connection goes
    /// soft-open behind a teardown timer; otherwise it is torn down
    /// immediately. A timer already armed for this connection is superseded.
    pub fn disconnect(self: &Arc<Self>, id: &ConnectionId, session_paused: bool) {
        if !session_paused {
            self.hard_close(id);
            return;
        }
        if !self.connections.contains_key(id) {
            return;
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.pending.insert(id.clone(), token.clone()) {
            previous.cancel();
        }
        debug!(conn_id = %id, delay_secs = self.config.teardown_delay_secs, "teardown armed");

        let registry = Arc::clone(self);
        let conn_id = id.clone();
        let delay = self.config.teardown_delay();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    counter!("relay_teardowns_fired").increment(1);
                    registry.hard_close(&conn_id);
                }
                () = token.cancelled() => {}
            }
        });
    }

    /// Reconnect within the grace window: disarm the teardown and swap the
    /// delivery queue, keeping every subscription. Returns `false` when the
    /// connection is gone and the client must subscribe from scratch.
    pub fn reattach(&self, id: &ConnectionId, tx: mpsc::Sender<Arc<String>>) -> bool {
        let Some(connection) = self.get(id) else {
            return false;
        };
        self.cancel_teardown(id);
        connection.reattach(tx);
        debug!(conn_id = %id, "connection reattached");
        true
    }

    /// Disarm a pending teardown, if any. Idempotent.
    pub fn cancel_teardown(&self, id: &ConnectionId) {
        if let Some((_, token)) = self.pending.remove(id) {
            token.cancel();
        }
    }

    /// Tear a connection down now: disarm any timer, drop the entry, and
    /// clear its subscriptions.
    pub fn hard_close(&self, id: &ConnectionId) {
        self.cancel_teardown(id);
        if let Some((_, connection)) = self.connections.remove(id) {
            connection.clear_subscriptions();
            gauge!("relay_connections").set(approx_f64(self.connections.len()));
            debug!(conn_id = %id, "connection closed");
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn approx_f64(count: usize) -> f64 {
    count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use arbiter_core::SessionId;

    fn test_config() -> RelayConfig {
        RelayConfig {
            teardown_delay_secs: 120,
            send_queue_capacity: 32,
        }
    }

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(test_config()))
    }

    fn queue() -> mpsc::Sender<Arc<String>> {
        mpsc::channel(32).0
    }

    fn match_channel() -> Channel {
        Channel::Match(SessionId::from("s1"))
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = registry();
        let conn = registry.register(UserId::from("alice"), queue());
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.get(&conn.id).is_some());
    }

    #[tokio::test]
    async fn subscribers_filter_by_channel() {
        let registry = registry();
        let a = registry.register(UserId::from("alice"), queue());
        let b = registry.register(UserId::from("bob"), queue());
        let _ = a.subscribe(match_channel());
        let _ = b.subscribe(Channel::User(UserId::from("bob")));

        let subs = registry.subscribers(&match_channel());
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, a.id);
    }

    #[tokio::test]
    async fn disconnect_active_session_closes_immediately() {
        let registry = registry();
        let conn = registry.register(UserId::from("alice"), queue());
        registry.disconnect(&conn.id, false);
        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.has_pending_teardown(&conn.id));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_fires_after_grace_window() {
        let registry = registry();
        let conn = registry.register(UserId::from("alice"), queue());
        let _ = conn.subscribe(match_channel());

        registry.disconnect(&conn.id, true);
        assert!(registry.has_pending_teardown(&conn.id));
        assert_eq!(registry.connection_count(), 1);

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert_eq!(registry.connection_count(), 0);
        assert!(conn.channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reattach_within_window_keeps_subscriptions() {
        let registry = registry();
        let conn = registry.register(UserId::from("alice"), queue());
        let _ = conn.subscribe(match_channel());
        registry.disconnect(&conn.id, true);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let (tx, mut rx) = mpsc::channel(32);
        assert!(registry.reattach(&conn.id, tx));
        assert!(!registry.has_pending_teardown(&conn.id));

        // The cancelled timer must not fire later
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(registry.connection_count(), 1);
        assert!(conn.is_subscribed(&match_channel()));
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn second_disconnect_supersedes_timer() {
        let registry = registry();
        let conn = registry.register(UserId::from("alice"), queue());
        registry.disconnect(&conn.id, true);

        // Rearm at t+100; the first timer's t+120 deadline must be void
        tokio::time::sleep(Duration::from_secs(100)).await;
        registry.disconnect(&conn.id, true);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(registry.connection_count(), 1);

        // The superseding timer still fires at its own deadline
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn reattach_after_close_reports_gone() {
        let registry = registry();
        let conn = registry.register(UserId::from("alice"), queue());
        registry.hard_close(&conn.id);
        assert!(!registry.reattach(&conn.id, queue()));
    }

    #[tokio::test]
    async fn disconnect_unknown_connection_is_noop() {
        let registry = registry();
        registry.disconnect(&ConnectionId::from("ghost"), true);
        assert!(!registry.has_pending_teardown(&ConnectionId::from("ghost")));
    }
}
