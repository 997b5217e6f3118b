//! Match vocabulary: statuses, results, end reasons, and sides.
//!
//! These enums are the wire-visible state of a session. The transition rules
//! that govern them live in `arbiter-match`; this module only defines the
//! values and the small predicates other crates need (`is_terminal`,
//! `opponent`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a match session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Both sides assigned but play has not started.
    Waiting,
    /// Play in progress.
    Active,
    /// Play suspended; the one allowed "backward" transition returns here
    /// to `Active`.
    Paused,
    /// Terminal: the match concluded with a result.
    Finished,
    /// Terminal: the match was annulled without a result.
    Aborted,
}

impl SessionStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Outcome of a finished match. `Undecided` until `status == Finished`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    /// The first side won.
    FirstWins,
    /// The second side won.
    SecondWins,
    /// Drawn.
    Draw,
    /// No result yet.
    Undecided,
}

impl MatchResult {
    /// The winning side, if the result is decisive.
    #[must_use]
    pub fn winner(self) -> Option<Side> {
        match self {
            Self::FirstWins => Some(Side::First),
            Self::SecondWins => Some(Side::Second),
            Self::Draw | Self::Undecided => None,
        }
    }
}

/// Why a match terminated. Set only when `status == Finished`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Terminal verdict from the external rules engine (checkmate,
    /// stalemate, or equivalent).
    CheckmateEquivalent,
    /// A player resigned.
    Resignation,
    /// Flag fall: a clock reached zero.
    Timeout,
    /// Both players agreed to a draw.
    DrawAgreed,
    /// A player never returned within the hard ceiling and forfeited.
    Abandonment,
}

/// The two sides of a match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The side that moves first.
    First,
    /// The side that moves second.
    Second,
}

impl Side {
    /// The other side.
    #[must_use]
    pub fn opponent(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }

    /// The result in which this side wins.
    #[must_use]
    pub fn winning_result(self) -> MatchResult {
        match self {
            Self::First => MatchResult::FirstWins,
            Self::Second => MatchResult::SecondWins,
        }
    }

    /// Index into per-side arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }
}

/// What caused a pause. Metadata the UI uses to differentiate; never
/// terminates the match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseKind {
    /// A participant explicitly paused.
    PlayerInitiated,
    /// Inactivity beyond the configured threshold.
    Inactivity,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
