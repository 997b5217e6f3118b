//! Event wire contract and channel names.
//!
//! [`MatchEvent`] is the field-level contract for everything the broadcaster
//! is permitted to emit. Events are tagged snake_case (`status_changed`,
//! `draw_offer_sent`, ...) and routed through logical [`Channel`]s: a
//! per-match channel (`match.{session_id}`) and per-user private channels
//! (`user.{user_id}`). The broker binding is the embedding application's
//! concern; this layer only names the topics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{SessionId, UserId};
use crate::state::{EndReason, MatchResult, SessionStatus, Side};

// ─────────────────────────────────────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────────────────────────────────────

/// A logical publish/subscribe topic.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Per-match channel carrying lifecycle events to both participants.
    Match(SessionId),
    /// Per-user private channel carrying negotiation notices.
    User(UserId),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match(id) => write!(f, "match.{id}"),
            Self::User(id) => write!(f, "user.{id}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Challenge details
// ─────────────────────────────────────────────────────────────────────────────

/// Which side the challenger asked to play.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorPreference {
    /// The challenger plays first.
    First,
    /// The challenger plays second.
    Second,
    /// Assigned at random on acceptance.
    Random,
}

/// Time control proposed with a challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeControl {
    /// Starting budget per side, in seconds.
    pub initial_secs: u64,
    /// Increment added after each move, in seconds.
    pub increment_secs: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Externally visible events, serialized with a snake_case `type` tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    /// The session's lifecycle status changed. `result` / `end_reason` /
    /// `winner_side` are present only when `status == finished`.
    StatusChanged {
        /// Session whose status changed.
        session_id: SessionId,
        /// New status.
        status: SessionStatus,
        /// Final result, when finished.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<MatchResult>,
        /// Why the match ended, when finished.
        #[serde(skip_serializing_if = "Option::is_none")]
        end_reason: Option<EndReason>,
        /// Winning side, when finished decisively.
        #[serde(skip_serializing_if = "Option::is_none")]
        winner_side: Option<Side>,
        /// When the transition committed.
        timestamp: DateTime<Utc>,
    },

    /// A move was accepted on an active session.
    MoveApplied {
        /// Session the move applies to.
        session_id: SessionId,
        /// Side that moved.
        by: Side,
        /// When the move was accepted.
        timestamp: DateTime<Utc>,
    },

    /// A draw offer was issued to the counterpart.
    DrawOfferSent {
        /// Session the offer concerns.
        session_id: SessionId,
        /// Offering participant.
        proposer_id: UserId,
        /// Counterpart being asked.
        target_id: UserId,
        /// When the offer lapses.
        expires_at: DateTime<Utc>,
    },

    /// A draw offer was declined; the slot is cleared.
    DrawOfferDeclined {
        /// Session the offer concerned.
        session_id: SessionId,
        /// Original offerer.
        proposer_id: UserId,
        /// Declining counterpart.
        target_id: UserId,
        /// Original expiry of the declined offer.
        expires_at: DateTime<Utc>,
    },

    /// A resume request was issued on a paused session.
    ResumeRequestSent {
        /// Session the request concerns.
        session_id: SessionId,
        /// Requesting participant.
        proposer_id: UserId,
        /// Counterpart being asked.
        target_id: UserId,
        /// When the request lapses.
        expires_at: DateTime<Utc>,
    },

    /// A resume request was declined; the slot is cleared.
    ResumeRequestDeclined {
        /// Session the request concerned.
        session_id: SessionId,
        /// Original requester.
        proposer_id: UserId,
        /// Declining counterpart.
        target_id: UserId,
        /// Original expiry of the declined request.
        expires_at: DateTime<Utc>,
    },

    /// A challenge / invitation was issued for a waiting session.
    ChallengeSent {
        /// Session the challenge would start.
        session_id: SessionId,
        /// Challenger.
        proposer_id: UserId,
        /// Invited user.
        target_id: UserId,
        /// Side the challenger asked for.
        color_preference: ColorPreference,
        /// Proposed time control.
        time_control: TimeControl,
        /// When the challenge lapses.
        expires_at: DateTime<Utc>,
    },
}

impl MatchEvent {
    /// The snake_case wire tag of this event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::MoveApplied { .. } => "move_applied",
            Self::DrawOfferSent { .. } => "draw_offer_sent",
            Self::DrawOfferDeclined { .. } => "draw_offer_declined",
            Self::ResumeRequestSent { .. } => "resume_request_sent",
            Self::ResumeRequestDeclined { .. } => "resume_request_declined",
            Self::ChallengeSent { .. } => "challenge_sent",
        }
    }

    /// The session this event concerns.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::StatusChanged { session_id, .. }
            | Self::MoveApplied { session_id, .. }
            | Self::DrawOfferSent { session_id, .. }
            | Self::DrawOfferDeclined { session_id, .. }
            | Self::ResumeRequestSent { session_id, .. }
            | Self::ResumeRequestDeclined { session_id, .. }
            | Self::ChallengeSent { session_id, .. } => session_id,
        }
    }
}

/// An event paired with its target channels, ready for fan-out.
///
/// The session manager computes the targets at emit time (it knows the
/// participants); the broadcaster publishes at most once per subscriber and
/// never mutates anything.
#[derive(Clone, Debug)]
pub struct Outbound {
    /// Channels this event is addressed to.
    pub channels: Vec<Channel>,
    /// The event itself.
    pub event: MatchEvent,
}

impl Outbound {
    /// Envelope a lifecycle event for the match channel plus both
    /// participants' private channels.
    #[must_use]
    pub fn lifecycle(event: MatchEvent, first: &UserId, second: &UserId) -> Self {
        let session_id = event.session_id().clone();
        Self {
            channels: vec![
                Channel::Match(session_id),
                Channel::User(first.clone()),
                Channel::User(second.clone()),
            ],
            event,
        }
    }

    /// Envelope a negotiation notice for a single user's private channel.
    #[must_use]
    pub fn notice(event: MatchEvent, recipient: &UserId) -> Self {
        Self {
            channels: vec![Channel::User(recipient.clone())],
            event,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
