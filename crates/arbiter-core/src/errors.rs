//! Error taxonomy for the arbiter match layer.
//!
//! Every fallible operation in the session core returns [`MatchError`]. All
//! variants are detected synchronously at the call site and returned to the
//! caller immediately; nothing is retried internally. Event delivery is the
//! one fire-and-forget path and never surfaces here.
//!
//! Each variant maps to a machine-readable [`MatchErrorCode`] serialized
//! SCREAMING_SNAKE for clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::ids::{SessionId, UserId};
use crate::state::SessionStatus;

/// Machine-readable error codes for the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchErrorCode {
    /// Caller is not a party to the session.
    #[serde(rename = "NOT_PARTICIPANT")]
    NotParticipant,
    /// Operation not valid for the session's current status.
    #[serde(rename = "INVALID_STATE")]
    InvalidState,
    /// A pending offer already exists, or a terminating race was lost.
    #[serde(rename = "CONFLICT")]
    Conflict,
    /// Session or offer does not exist (or was already resolved).
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    /// Offer TTL elapsed. Distinct from `NOT_FOUND` so clients can prompt
    /// "offer again".
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl fmt::Display for MatchErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_else(|_| "UNKNOWN".to_owned());
        // Strip surrounding quotes
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Error type for session, clock, negotiation, and registry operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MatchError {
    /// The caller is not a participant of the session. Always rejected with
    /// no side effect.
    #[error("user {user_id} is not a participant of session {session_id}")]
    NotParticipant {
        /// Session the caller tried to act on.
        session_id: SessionId,
        /// The non-participant caller.
        user_id: UserId,
    },

    /// The operation is not valid for the session's current status.
    #[error("{operation} is not valid while session {session_id} is {status}")]
    InvalidState {
        /// Session in the wrong state.
        session_id: SessionId,
        /// Current status that rejected the operation.
        status: SessionStatus,
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// First-committer-wins: a terminating cause raced and this one lost,
    /// or a pending offer of the same kind already exists.
    #[error("conflict on session {session_id}: {detail}")]
    Conflict {
        /// Session the conflict occurred on.
        session_id: SessionId,
        /// What conflicted.
        detail: String,
    },

    /// The referenced session does not exist.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The missing session.
        session_id: SessionId,
    },

    /// The referenced offer does not exist or was already resolved.
    #[error("no pending offer for session {session_id}")]
    OfferNotFound {
        /// Session the offer was expected on.
        session_id: SessionId,
    },

    /// The offer's TTL elapsed before it was resolved.
    #[error("offer expired for session {session_id}")]
    Expired {
        /// Session the expired offer belonged to.
        session_id: SessionId,
    },
}

impl MatchError {
    /// The wire code for this error.
    #[must_use]
    pub fn code(&self) -> MatchErrorCode {
        match self {
            Self::NotParticipant { .. } => MatchErrorCode::NotParticipant,
            Self::InvalidState { .. } => MatchErrorCode::InvalidState,
            Self::Conflict { .. } => MatchErrorCode::Conflict,
            Self::SessionNotFound { .. } | Self::OfferNotFound { .. } => MatchErrorCode::NotFound,
            Self::Expired { .. } => MatchErrorCode::Expired,
        }
    }

    /// Shorthand for a terminating-race conflict.
    #[must_use]
    pub fn terminal_race(session_id: SessionId, status: SessionStatus) -> Self {
        Self::Conflict {
            session_id,
            detail: format!("session already {status}"),
        }
    }

    /// Shorthand for a duplicate pending offer.
    #[must_use]
    pub fn pending_offer(session_id: SessionId) -> Self {
        Self::Conflict {
            session_id,
            detail: "a pending offer of this kind already exists".to_owned(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
