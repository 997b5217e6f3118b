//! Session persistence.
//!
//! [`SessionStore`] is the seam between the in-memory session map and
//! whatever durability backend a deployment wires in. The trait is
//! synchronous and called while holding a session's lock, so saves observe
//! exactly the state the transition committed.
//!
//! `save` takes the status the caller last observed in the store; a
//! mismatch means another writer got there first and surfaces as
//! [`StoreError::StatusConflict`] instead of silently overwriting.

use dashmap::DashMap;
use thiserror::Error;

use arbiter_core::{SessionId, SessionStatus, UserId};

use crate::session::Session;

/// Persistence-layer failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Conditional save lost: the persisted status is not what the caller
    /// last observed.
    #[error("session {session_id} is {actual}, expected {expected}")]
    StatusConflict {
        /// The contested session.
        session_id: SessionId,
        /// Status the caller observed before its transition.
        expected: SessionStatus,
        /// Status actually persisted.
        actual: SessionStatus,
    },
    /// Conditional save against a session the store does not hold.
    #[error("session {session_id} is not persisted")]
    Missing {
        /// The absent session.
        session_id: SessionId,
    },
    /// Backend failure (I/O, connection pool, and so on).
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Durable storage for sessions.
pub trait SessionStore: Send + Sync {
    /// Fetch a session by id.
    fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Persist a session. When `expected` is given the save only applies if
    /// the persisted status still matches; `None` writes unconditionally
    /// (used for freshly created sessions).
    fn save(&self, session: &Session, expected: Option<SessionStatus>) -> Result<(), StoreError>;

    /// Remove a session. Returns whether it existed.
    fn delete(&self, id: &SessionId) -> Result<bool, StoreError>;

    /// Every non-terminal session a user participates in; the presence and
    /// resume listing. Finished and aborted sessions are not returned.
    fn for_participant(&self, user: &UserId) -> Result<Vec<Session>, StoreError>;
}

/// In-memory store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionId, Session>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    fn save(&self, session: &Session, expected: Option<SessionStatus>) -> Result<(), StoreError> {
        match expected {
            None => {
                let _ = self.sessions.insert(session.id.clone(), session.clone());
                Ok(())
            }
            Some(expected) => {
                let mut entry =
                    self.sessions
                        .get_mut(&session.id)
                        .ok_or_else(|| StoreError::Missing {
                            session_id: session.id.clone(),
                        })?;
                if entry.status != expected {
                    return Err(StoreError::StatusConflict {
                        session_id: session.id.clone(),
                        expected,
                        actual: entry.status,
                    });
                }
                *entry = session.clone();
                Ok(())
            }
        }
    }

    fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        Ok(self.sessions.remove(id).is_some())
    }

    fn for_participant(&self, user: &UserId) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| !entry.status.is_terminal() && entry.side_of(user).is_some())
            .map(|entry| entry.clone())
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
