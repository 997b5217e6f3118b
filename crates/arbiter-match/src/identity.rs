//! Identity predicates consumed by the session layer.
//!
//! Who a user is and whether they are reachable is the embedding
//! application's business; the session layer only asks two questions
//! through this seam.

use dashmap::DashSet;

use arbiter_core::UserId;

use crate::session::Session;

/// Predicates the session layer needs from the identity system.
pub trait Identity: Send + Sync {
    /// Whether a user may act on a session.
    fn is_participant(&self, user: &UserId, session: &Session) -> bool {
        session.side_of(user).is_some()
    }

    /// Whether a user currently has a live connection.
    fn is_online(&self, user: &UserId) -> bool;
}

/// In-memory identity backed by an online-user set. Suitable for tests and
/// single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryIdentity {
    online: DashSet<UserId>,
}

impl MemoryIdentity {
    /// Create an identity with nobody online.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user online.
    pub fn set_online(&self, user: UserId) {
        let _ = self.online.insert(user);
    }

    /// Mark a user offline.
    pub fn set_offline(&self, user: &UserId) {
        let _ = self.online.remove(user);
    }
}

impl Identity for MemoryIdentity {
    fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }
}
