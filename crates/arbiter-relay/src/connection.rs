//! Client connection state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use arbiter_core::{Channel, ConnectionId, UserId};

/// One authenticated client connection and its channel subscriptions.
///
/// Subscriptions are ref-counted: the same channel can be subscribed for
/// several independent reasons (a UI pane plus a notification badge, say)
/// and delivery stops only when every reason has unsubscribed.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// The authenticated user behind this connection.
    pub user_id: UserId,
    /// Delivery queue to the client's write task. Swapped on reattach.
    tx: Mutex<mpsc::Sender<Arc<String>>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Subscription ref-counts per channel.
    channels: Mutex<HashMap<Channel, usize>>,
    /// Count of messages dropped due to a full or closed queue.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection for a user.
    pub fn new(id: ConnectionId, user_id: UserId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            user_id,
            tx: Mutex::new(tx),
            connected_at: Instant::now(),
            channels: Mutex::new(HashMap::new()),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Subscribe to a channel. Returns the new ref-count.
    pub fn subscribe(&self, channel: Channel) -> usize {
        let mut channels = self.channels.lock();
        let count = channels.entry(channel).or_insert(0);
        *count += 1;
        *count
    }

    /// Drop one subscription reference. Returns the remaining ref-count;
    /// the channel stops delivering at zero. Unsubscribing a channel that
    /// was never subscribed is a no-op.
    pub fn unsubscribe(&self, channel: &Channel) -> usize {
        let mut channels = self.channels.lock();
        match channels.get_mut(channel) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                let _ = channels.remove(channel);
                0
            }
            None => 0,
        }
    }

    /// Whether this connection currently receives a channel.
    pub fn is_subscribed(&self, channel: &Channel) -> bool {
        self.channels.lock().contains_key(channel)
    }

    /// The channels this connection receives.
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.lock().keys().cloned().collect()
    }

    /// Drop every subscription (connection teardown).
    pub fn clear_subscriptions(&self) {
        self.channels.lock().clear();
    }

    /// Replace the delivery queue (client reconnected within the grace
    /// window). Subscriptions are untouched.
    pub fn reattach(&self, tx: mpsc::Sender<Arc<String>>) {
        *self.tx.lock() = tx;
    }

    /// Send a serialized message to the client.
    ///
    /// Returns `false` if the queue is full or closed, and increments the
    /// dropped message counter.
    pub fn send(&self, message: Arc<String>) -> bool {
        let tx = self.tx.lock().clone();
        if tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
