//! The session state machine.
//!
//! One [`Session`] per match, owning the canonical status and enforcing
//! legal transitions:
//!
//! ```text
//! waiting ──▶ active ◀──▶ paused
//!               │
//!               ▼
//!            finished        any non-terminal ──▶ aborted
//! ```
//!
//! A transition into `finished` is atomic with respect to all other
//! transition attempts: the caller must hold the session's lock (see
//! [`crate::manager::SessionManager`]), and a terminating cause arriving
//! after another has committed gets a `Conflict`. First committer wins;
//! the loser is never silently dropped and never double-applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use arbiter_core::{
    EndReason, MatchError, MatchEvent, MatchResult, PauseKind, SessionId, SessionStatus, Side,
    UserId,
};

use crate::clock::{ClockConfig, ClockState};

/// A decisive or drawn verdict from the external rules engine.
///
/// An explicit type so an undecided verdict is unrepresentable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulesVerdict {
    /// The first side won (checkmate-equivalent).
    FirstWins,
    /// The second side won (checkmate-equivalent).
    SecondWins,
    /// Drawn position (stalemate-equivalent).
    Draw,
}

impl RulesVerdict {
    fn result(self) -> MatchResult {
        match self {
            Self::FirstWins => MatchResult::FirstWins,
            Self::SecondWins => MatchResult::SecondWins,
            Self::Draw => MatchResult::Draw,
        }
    }
}

/// What terminated a session. Exactly one cause wins per session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalCause {
    /// A side resigned.
    Resignation {
        /// The resigning side.
        loser: Side,
    },
    /// A side's clock reached zero.
    FlagFall {
        /// The flagged side.
        loser: Side,
    },
    /// Draw negotiation accepted.
    DrawAgreed,
    /// Terminal signal from the external rules engine.
    Verdict(RulesVerdict),
    /// A side forfeited by never returning within the hard ceiling.
    Abandonment {
        /// The absent side.
        loser: Side,
    },
}

impl TerminalCause {
    /// The `(result, end_reason)` pair this cause commits.
    #[must_use]
    pub fn outcome(self) -> (MatchResult, EndReason) {
        match self {
            Self::Resignation { loser } => {
                (loser.opponent().winning_result(), EndReason::Resignation)
            }
            Self::FlagFall { loser } => (loser.opponent().winning_result(), EndReason::Timeout),
            Self::DrawAgreed => (MatchResult::Draw, EndReason::DrawAgreed),
            Self::Verdict(verdict) => (verdict.result(), EndReason::CheckmateEquivalent),
            Self::Abandonment { loser } => {
                (loser.opponent().winning_result(), EndReason::Abandonment)
            }
        }
    }
}

/// One match session with authoritative status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier for the match's lifetime.
    pub id: SessionId,
    /// The player on the first side.
    pub first: UserId,
    /// The player on the second side.
    pub second: UserId,
    /// Canonical lifecycle status.
    pub status: SessionStatus,
    /// Final result; `Undecided` unless `status == Finished`.
    pub result: MatchResult,
    /// Why the match ended; set only when `status == Finished`.
    pub end_reason: Option<EndReason>,
    /// Why the session is paused, while it is.
    pub pause: Option<PauseKind>,
    /// Per-side clocks.
    pub clock: ClockState,
    /// Updated on every accepted player action; drives presence and
    /// inactivity decisions.
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session in `Waiting`.
    #[must_use]
    pub fn new(
        id: SessionId,
        first: UserId,
        second: UserId,
        clock: ClockConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            first,
            second,
            status: SessionStatus::Waiting,
            result: MatchResult::Undecided,
            end_reason: None,
            pause: None,
            clock: ClockState::new(clock, now),
            last_activity_at: now,
        }
    }

    /// Which side a user plays, if they are a participant.
    #[must_use]
    pub fn side_of(&self, user: &UserId) -> Option<Side> {
        if *user == self.first {
            Some(Side::First)
        } else if *user == self.second {
            Some(Side::Second)
        } else {
            None
        }
    }

    /// The user playing a side.
    #[must_use]
    pub fn user_of(&self, side: Side) -> &UserId {
        match side {
            Side::First => &self.first,
            Side::Second => &self.second,
        }
    }

    /// `waiting → active`: both sides present / first move made.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<(), MatchError> {
        self.expect_status(SessionStatus::Waiting, "begin")?;
        self.status = SessionStatus::Active;
        self.clock.start(now);
        self.last_activity_at = now;
        Ok(())
    }

    /// Accept a move by `side` on an active session: charge the mover's
    /// clock, flip the turn. Move legality is the rules engine's concern;
    /// turn order is enforced here because it is clock semantics.
    pub fn apply_move(&mut self, side: Side, now: DateTime<Utc>) -> Result<(), MatchError> {
        self.expect_status(SessionStatus::Active, "apply_move")?;
        if side != self.clock.turn() {
            return Err(MatchError::InvalidState {
                session_id: self.id.clone(),
                status: self.status,
                operation: "apply_move out of turn",
            });
        }
        self.clock.flip(now);
        self.last_activity_at = now;
        Ok(())
    }

    /// `active → paused`. Inactivity pauses are system-initiated and do not
    /// count as player activity.
    pub fn pause(&mut self, kind: PauseKind, now: DateTime<Utc>) -> Result<(), MatchError> {
        self.expect_status(SessionStatus::Active, "pause")?;
        self.status = SessionStatus::Paused;
        self.pause = Some(kind);
        self.clock.halt(now);
        if kind == PauseKind::PlayerInitiated {
            self.last_activity_at = now;
        }
        Ok(())
    }

    /// `paused → active`: the one allowed backward transition.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), MatchError> {
        self.expect_status(SessionStatus::Paused, "resume")?;
        self.status = SessionStatus::Active;
        self.pause = None;
        self.clock.start(now);
        self.last_activity_at = now;
        Ok(())
    }

    /// `active → finished`. First-committer-wins: if the session already
    /// terminated, the losing cause observes a `Conflict`.
    pub fn finish(&mut self, cause: TerminalCause, now: DateTime<Utc>) -> Result<(), MatchError> {
        match self.status {
            SessionStatus::Active => {
                let (result, end_reason) = cause.outcome();
                self.status = SessionStatus::Finished;
                self.result = result;
                self.end_reason = Some(end_reason);
                self.pause = None;
                self.clock.halt(now);
                self.last_activity_at = now;
                Ok(())
            }
            status if status.is_terminal() => {
                Err(MatchError::terminal_race(self.id.clone(), status))
            }
            status => Err(MatchError::InvalidState {
                session_id: self.id.clone(),
                status,
                operation: "finish",
            }),
        }
    }

    /// `any non-terminal → aborted`: administrative or unrecoverable
    /// failure. Aborted sessions carry no result.
    pub fn abort(&mut self, now: DateTime<Utc>) -> Result<(), MatchError> {
        if self.status.is_terminal() {
            return Err(MatchError::terminal_race(self.id.clone(), self.status));
        }
        self.status = SessionStatus::Aborted;
        self.pause = None;
        self.clock.halt(now);
        Ok(())
    }

    /// Build the `status_changed` event for the current state.
    #[must_use]
    pub fn status_event(&self, timestamp: DateTime<Utc>) -> MatchEvent {
        let finished = self.status == SessionStatus::Finished;
        MatchEvent::StatusChanged {
            session_id: self.id.clone(),
            status: self.status,
            result: finished.then_some(self.result),
            end_reason: if finished { self.end_reason } else { None },
            winner_side: if finished { self.result.winner() } else { None },
            timestamp,
        }
    }

    /// The terminal-state invariant: `result` and `end_reason` are set if
    /// and only if the session is finished.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let finished = self.status == SessionStatus::Finished;
        finished == (self.result != MatchResult::Undecided && self.end_reason.is_some())
    }

    fn expect_status(
        &self,
        expected: SessionStatus,
        operation: &'static str,
    ) -> Result<(), MatchError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(MatchError::InvalidState {
                session_id: self.id.clone(),
                status: self.status,
                operation,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn make_session() -> Session {
        Session::new(
            SessionId::from("s1"),
            UserId::from("alice"),
            UserId::from("bob"),
            ClockConfig::Multiplayer {
                initial_secs: 300,
                increment_secs: 0,
            },
            t0(),
        )
    }

    fn active_session() -> Session {
        let mut session = make_session();
        session.begin(t0()).unwrap();
        session
    }

    #[test]
    fn new_session_waiting_and_consistent() {
        let session = make_session();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.result, MatchResult::Undecided);
        assert_eq!(session.end_reason, None);
        assert!(session.is_consistent());
    }

    #[test]
    fn side_of_participants() {
        let session = make_session();
        assert_eq!(session.side_of(&UserId::from("alice")), Some(Side::First));
        assert_eq!(session.side_of(&UserId::from("bob")), Some(Side::Second));
        assert_eq!(session.side_of(&UserId::from("mallory")), None);
    }

    #[test]
    fn user_of_sides() {
        let session = make_session();
        assert_eq!(session.user_of(Side::First).as_str(), "alice");
        assert_eq!(session.user_of(Side::Second).as_str(), "bob");
    }

    #[test]
    fn begin_starts_play_and_clock() {
        let mut session = make_session();
        session.begin(t0()).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.clock.is_running());
    }

    #[test]
    fn begin_twice_is_invalid_state() {
        let mut session = active_session();
        assert_matches!(
            session.begin(t0()),
            Err(MatchError::InvalidState {
                status: SessionStatus::Active,
                ..
            })
        );
    }

    #[test]
    fn apply_move_flips_turn_and_touches() {
        let mut session = active_session();
        let t1 = t0() + TimeDelta::seconds(10);
        session.apply_move(Side::First, t1).unwrap();
        assert_eq!(session.clock.turn(), Side::Second);
        assert_eq!(session.last_activity_at, t1);
    }

    #[test]
    fn apply_move_out_of_turn_rejected() {
        let mut session = active_session();
        let err = session.apply_move(Side::Second, t0()).unwrap_err();
        assert_matches!(err, MatchError::InvalidState { .. });
        // Turn unchanged
        assert_eq!(session.clock.turn(), Side::First);
    }

    #[test]
    fn apply_move_on_waiting_rejected() {
        let mut session = make_session();
        assert_matches!(
            session.apply_move(Side::First, t0()),
            Err(MatchError::InvalidState {
                status: SessionStatus::Waiting,
                ..
            })
        );
    }

    #[test]
    fn pause_and_resume_roundtrip() {
        let mut session = active_session();
        session.pause(PauseKind::PlayerInitiated, t0()).unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.pause, Some(PauseKind::PlayerInitiated));
        assert!(!session.clock.is_running());

        session.resume(t0() + TimeDelta::seconds(60)).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.pause, None);
        assert!(session.clock.is_running());
    }

    #[test]
    fn inactivity_pause_does_not_touch_activity() {
        let mut session = active_session();
        let before = session.last_activity_at;
        session
            .pause(PauseKind::Inactivity, t0() + TimeDelta::seconds(700))
            .unwrap();
        assert_eq!(session.last_activity_at, before);
        assert_eq!(session.pause, Some(PauseKind::Inactivity));
    }

    #[test]
    fn resume_from_active_rejected() {
        let mut session = active_session();
        assert_matches!(session.resume(t0()), Err(MatchError::InvalidState { .. }));
    }

    #[test]
    fn resignation_outcome() {
        let mut session = active_session();
        session
            .finish(TerminalCause::Resignation { loser: Side::First }, t0())
            .unwrap();
        assert_eq!(session.status, SessionStatus::Finished);
        assert_eq!(session.result, MatchResult::SecondWins);
        assert_eq!(session.end_reason, Some(EndReason::Resignation));
        assert!(session.is_consistent());
    }

    #[test]
    fn flag_fall_outcome() {
        let mut session = active_session();
        session
            .finish(TerminalCause::FlagFall { loser: Side::Second }, t0())
            .unwrap();
        assert_eq!(session.result, MatchResult::FirstWins);
        assert_eq!(session.end_reason, Some(EndReason::Timeout));
    }

    #[test]
    fn draw_agreed_outcome() {
        let mut session = active_session();
        session.finish(TerminalCause::DrawAgreed, t0()).unwrap();
        assert_eq!(session.result, MatchResult::Draw);
        assert_eq!(session.end_reason, Some(EndReason::DrawAgreed));
    }

    #[test]
    fn rules_verdict_outcome() {
        let mut session = active_session();
        session
            .finish(TerminalCause::Verdict(RulesVerdict::FirstWins), t0())
            .unwrap();
        assert_eq!(session.result, MatchResult::FirstWins);
        assert_eq!(session.end_reason, Some(EndReason::CheckmateEquivalent));
    }

    #[test]
    fn abandonment_outcome() {
        let mut session = active_session();
        session
            .finish(TerminalCause::Abandonment { loser: Side::Second }, t0())
            .unwrap();
        assert_eq!(session.result, MatchResult::FirstWins);
        assert_eq!(session.end_reason, Some(EndReason::Abandonment));
    }

    #[test]
    fn second_terminating_cause_is_conflict() {
        let mut session = active_session();
        session
            .finish(TerminalCause::Resignation { loser: Side::First }, t0())
            .unwrap();
        // The racing flag fall loses and sees a conflict, not a double apply
        let err = session
            .finish(TerminalCause::FlagFall { loser: Side::First }, t0())
            .unwrap_err();
        assert_matches!(err, MatchError::Conflict { .. });
        assert_eq!(session.result, MatchResult::SecondWins);
        assert_eq!(session.end_reason, Some(EndReason::Resignation));
    }

    #[test]
    fn finish_from_paused_is_invalid_state_not_conflict() {
        let mut session = active_session();
        session.pause(PauseKind::PlayerInitiated, t0()).unwrap();
        let err = session
            .finish(TerminalCause::Resignation { loser: Side::First }, t0())
            .unwrap_err();
        assert_matches!(
            err,
            MatchError::InvalidState {
                status: SessionStatus::Paused,
                ..
            }
        );
    }

    #[test]
    fn abort_from_any_non_terminal() {
        for setup in [
            make_session(),
            active_session(),
            {
                let mut s = active_session();
                s.pause(PauseKind::Inactivity, t0()).unwrap();
                s
            },
        ] {
            let mut session = setup;
            session.abort(t0()).unwrap();
            assert_eq!(session.status, SessionStatus::Aborted);
            // Aborted carries no result
            assert_eq!(session.result, MatchResult::Undecided);
            assert_eq!(session.end_reason, None);
            assert!(session.is_consistent());
        }
    }

    #[test]
    fn abort_after_finish_is_conflict() {
        let mut session = active_session();
        session.finish(TerminalCause::DrawAgreed, t0()).unwrap();
        assert_matches!(session.abort(t0()), Err(MatchError::Conflict { .. }));
    }

    #[test]
    fn status_event_omits_result_until_finished() {
        let session = active_session();
        let event = session.status_event(t0());
        assert_matches!(
            event,
            MatchEvent::StatusChanged {
                status: SessionStatus::Active,
                result: None,
                end_reason: None,
                winner_side: None,
                ..
            }
        );
    }

    #[test]
    fn status_event_carries_terminal_tuple() {
        let mut session = active_session();
        session
            .finish(TerminalCause::Resignation { loser: Side::First }, t0())
            .unwrap();
        let event = session.status_event(t0());
        assert_matches!(
            event,
            MatchEvent::StatusChanged {
                status: SessionStatus::Finished,
                result: Some(MatchResult::SecondWins),
                end_reason: Some(EndReason::Resignation),
                winner_side: Some(Side::Second),
                ..
            }
        );
    }

    #[test]
    fn serde_roundtrip() {
        let session = active_session();
        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            Begin,
            Move(Side),
            Pause(PauseKind),
            Resume,
            Finish(TerminalCause),
            Abort,
        }

        fn side() -> impl Strategy<Value = Side> {
            prop_oneof![Just(Side::First), Just(Side::Second)]
        }

        fn cause() -> impl Strategy<Value = TerminalCause> {
            prop_oneof![
                side().prop_map(|loser| TerminalCause::Resignation { loser }),
                side().prop_map(|loser| TerminalCause::FlagFall { loser }),
                Just(TerminalCause::DrawAgreed),
                Just(TerminalCause::Verdict(RulesVerdict::FirstWins)),
                Just(TerminalCause::Verdict(RulesVerdict::Draw)),
                side().prop_map(|loser| TerminalCause::Abandonment { loser }),
            ]
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                Just(Op::Begin),
                side().prop_map(Op::Move),
                prop_oneof![Just(PauseKind::PlayerInitiated), Just(PauseKind::Inactivity)]
                    .prop_map(Op::Pause),
                Just(Op::Resume),
                cause().prop_map(Op::Finish),
                Just(Op::Abort),
            ]
        }

        proptest! {
            // Whatever the caller throws at the machine, the terminal
            // invariant holds and terminal states never change again.
            #[test]
            fn operation_sequences_preserve_terminal_invariant(
                ops in proptest::collection::vec(op(), 1..48)
            ) {
                let mut session = make_session();
                let mut now = t0();
                for op in ops {
                    now += TimeDelta::seconds(1);
                    let before = session.status;
                    let _ = match op {
                        Op::Begin => session.begin(now),
                        Op::Move(s) => session.apply_move(s, now),
                        Op::Pause(kind) => session.pause(kind, now),
                        Op::Resume => session.resume(now),
                        Op::Finish(c) => session.finish(c, now),
                        Op::Abort => session.abort(now),
                    };
                    prop_assert!(session.is_consistent());
                    if before.is_terminal() {
                        prop_assert_eq!(session.status, before);
                    }
                }
            }
        }
    }
}
