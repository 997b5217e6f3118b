//! The session manager.
//!
//! Owns the live session map and serializes every mutation per session:
//! each session sits behind its own `Arc<Mutex<_>>`, and every transition or
//! negotiation resolution runs start-to-finish under that lock. Two
//! concurrent terminating causes therefore resolve first-committer-wins and
//! the loser observes a `Conflict`.
//!
//! Accepted transitions are emitted on a broadcast channel as [`Outbound`]
//! envelopes after commit. Emission is fire-and-forget: a full or
//! subscriber-less channel never fails the acting caller.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use arbiter_core::{
    Channel, ColorPreference, MatchError, MatchEvent, Outbound, PauseKind, SessionId,
    SessionStatus, Side, TimeControl, UserId,
};

use crate::clock::{ClockConfig, ClockState};
use crate::config::MatchConfig;
use crate::identity::Identity;
use crate::negotiation::{ChallengeTerms, NegotiationOffer, NegotiationStore, OfferKind};
use crate::session::{RulesVerdict, Session, TerminalCause};
use crate::store::{SessionStore, StoreError};

/// Outbound event channel capacity. Slow subscribers lag and drop rather
/// than backpressure transitions.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A user's presence snapshot.
#[derive(Clone, Debug)]
pub struct Presence {
    /// The user in question.
    pub user_id: UserId,
    /// Whether they currently have a live connection.
    pub online: bool,
    /// Their non-terminal sessions, for resume listings.
    pub sessions: Vec<Session>,
}

/// Authoritative coordinator for session lifecycle, clocks, and negotiation.
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    offers: NegotiationStore,
    store: Arc<dyn SessionStore>,
    identity: Arc<dyn Identity>,
    config: MatchConfig,
    events: broadcast::Sender<Outbound>,
}

impl SessionManager {
    /// Create a manager over the given persistence and identity seams.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, identity: Arc<dyn Identity>, config: MatchConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sessions: DashMap::new(),
            offers: NegotiationStore::new(),
            store,
            identity,
            config,
            events,
        }
    }

    /// Subscribe to the outbound event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.events.subscribe()
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Create a session in `waiting`. Creation is not a transition, so no
    /// event is emitted.
    pub fn create_session(
        &self,
        first: UserId,
        second: UserId,
        clock: ClockConfig,
        now: DateTime<Utc>,
    ) -> Result<Session, MatchError> {
        let id = SessionId::new();
        let session = Session::new(id.clone(), first, second, clock, now);
        self.store
            .save(&session, None)
            .map_err(|err| Self::store_error(&id, err))?;
        let _ = self
            .sessions
            .insert(id.clone(), Arc::new(Mutex::new(session.clone())));
        info!(session_id = %id, "session created");
        Ok(session)
    }

    /// `waiting → active`: both sides present / first move made.
    pub fn begin(
        &self,
        id: &SessionId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        self.guard(&session, user)?;
        session.begin(now)?;
        self.commit(&session, SessionStatus::Waiting)?;
        self.emit_lifecycle(&session, now);
        Ok(())
    }

    /// Accept a move by `user`: charge their clock, flip the turn, announce
    /// on the match channel. Move legality is the rules engine's concern.
    pub fn apply_move(
        &self,
        id: &SessionId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        let side = self.guard(&session, user)?;
        session.apply_move(side, now)?;
        self.commit(&session, SessionStatus::Active)?;
        self.emit(Outbound {
            channels: vec![Channel::Match(id.clone())],
            event: MatchEvent::MoveApplied {
                session_id: id.clone(),
                by: side,
                timestamp: now,
            },
        });
        Ok(())
    }

    /// `active → finished`, resignation by `user`.
    pub fn resign(
        &self,
        id: &SessionId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        let side = self.guard(&session, user)?;
        session.finish(TerminalCause::Resignation { loser: side }, now)?;
        self.finalize(&session, SessionStatus::Active, now)
    }

    /// `active → paused`, player-initiated.
    pub fn pause(
        &self,
        id: &SessionId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        self.guard(&session, user)?;
        session.pause(PauseKind::PlayerInitiated, now)?;
        self.commit(&session, SessionStatus::Active)?;
        self.emit_lifecycle(&session, now);
        Ok(())
    }

    /// `paused → active`: the pausing player returned and confirms directly,
    /// no negotiation needed.
    pub fn resume_direct(
        &self,
        id: &SessionId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        self.guard(&session, user)?;
        session.resume(now)?;
        self.commit(&session, SessionStatus::Paused)?;
        self.emit_lifecycle(&session, now);
        Ok(())
    }

    /// `any non-terminal → aborted`: administrative shutdown. Carries no
    /// result.
    pub fn abort(&self, id: &SessionId, now: DateTime<Utc>) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        let prior = session.status;
        session.abort(now)?;
        let _ = self.offers.clear_session(id);
        self.commit(&session, prior)?;
        info!(session_id = %id, "session aborted");
        self.emit_lifecycle(&session, now);
        Ok(())
    }

    /// Terminal verdict from the external rules engine
    /// (checkmate/stalemate-equivalent).
    pub fn rules_verdict(
        &self,
        id: &SessionId,
        verdict: RulesVerdict,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        session.finish(TerminalCause::Verdict(verdict), now)?;
        self.finalize(&session, SessionStatus::Active, now)
    }

    /// One housekeeping pass over every live session: flag-fall and
    /// inactivity pause on active sessions, abandonment on paused ones.
    /// Returns the number of transitions applied.
    ///
    /// Flag-fall losing a race against another terminating cause is normal;
    /// the conflict is swallowed here because the earlier cause already won.
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        let live: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut transitions = 0;
        for entry in live {
            let mut session = entry.lock();
            match session.status {
                SessionStatus::Active => {
                    if let Some(loser) = session.clock.flag_fallen(now) {
                        if session.finish(TerminalCause::FlagFall { loser }, now).is_ok() {
                            let id = session.id.clone();
                            info!(session_id = %id, loser = ?loser, "flag fell");
                            if self.finalize(&session, SessionStatus::Active, now).is_ok() {
                                transitions += 1;
                            }
                        }
                    } else if now - session.last_activity_at >= ttl(self.config.inactivity_pause_secs)
                        && session.pause(PauseKind::Inactivity, now).is_ok()
                        && self.commit(&session, SessionStatus::Active).is_ok()
                    {
                        debug!(session_id = %session.id, "paused for inactivity");
                        self.emit_lifecycle(&session, now);
                        transitions += 1;
                    }
                }
                SessionStatus::Paused => {
                    if now - session.last_activity_at >= ttl(self.config.abandonment_ceiling_secs)
                        && self.forfeit_abandonment(&mut session, now)
                    {
                        transitions += 1;
                    }
                }
                _ => {}
            }
        }
        transitions
    }

    // ─────────────────────────────────────────────────────────────────────
    // Negotiation
    // ─────────────────────────────────────────────────────────────────────

    /// Offer a draw to the opponent on an active session.
    pub fn offer_draw(
        &self,
        id: &SessionId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<NegotiationOffer, MatchError> {
        let entry = self.entry(id)?;
        let session = entry.lock();
        let side = self.guard(&session, user)?;
        Self::expect(&session, SessionStatus::Active, "offer_draw")?;
        let target = session.user_of(side.opponent()).clone();
        let offer = self.offers.issue(
            id.clone(),
            OfferKind::Draw,
            user.clone(),
            target.clone(),
            ttl(self.config.draw_offer_ttl_secs),
            None,
            now,
        )?;
        self.emit(Outbound::notice(
            MatchEvent::DrawOfferSent {
                session_id: id.clone(),
                proposer_id: user.clone(),
                target_id: target.clone(),
                expires_at: offer.expires_at,
            },
            &target,
        ));
        Ok(offer)
    }

    /// Answer the opponent's pending draw offer. Accepting finishes the
    /// session as an agreed draw; declining clears the slot and notifies
    /// the proposer.
    pub fn respond_draw(
        &self,
        id: &SessionId,
        user: &UserId,
        accept: bool,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        let side = self.guard(&session, user)?;
        Self::expect(&session, SessionStatus::Active, "respond_draw")?;
        let proposer = session.user_of(side.opponent()).clone();
        let offer = self.offers.take(id, &proposer, OfferKind::Draw, now)?;
        if accept {
            session.finish(TerminalCause::DrawAgreed, now)?;
            self.finalize(&session, SessionStatus::Active, now)
        } else {
            self.emit(Outbound::notice(
                MatchEvent::DrawOfferDeclined {
                    session_id: id.clone(),
                    proposer_id: proposer.clone(),
                    target_id: user.clone(),
                    expires_at: offer.expires_at,
                },
                &proposer,
            ));
            Ok(())
        }
    }

    /// Ask the opponent to resume a paused session.
    pub fn request_resume(
        &self,
        id: &SessionId,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<NegotiationOffer, MatchError> {
        let entry = self.entry(id)?;
        let session = entry.lock();
        let side = self.guard(&session, user)?;
        Self::expect(&session, SessionStatus::Paused, "request_resume")?;
        let target = session.user_of(side.opponent()).clone();
        let offer = self.offers.issue(
            id.clone(),
            OfferKind::Resume,
            user.clone(),
            target.clone(),
            ttl(self.config.resume_request_ttl_secs),
            None,
            now,
        )?;
        self.emit(Outbound::notice(
            MatchEvent::ResumeRequestSent {
                session_id: id.clone(),
                proposer_id: user.clone(),
                target_id: target.clone(),
                expires_at: offer.expires_at,
            },
            &target,
        ));
        Ok(offer)
    }

    /// Answer the opponent's pending resume request. Accepting resumes play.
    pub fn respond_resume(
        &self,
        id: &SessionId,
        user: &UserId,
        accept: bool,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        let side = self.guard(&session, user)?;
        Self::expect(&session, SessionStatus::Paused, "respond_resume")?;
        let proposer = session.user_of(side.opponent()).clone();
        let offer = self.offers.take(id, &proposer, OfferKind::Resume, now)?;
        if accept {
            session.resume(now)?;
            self.commit(&session, SessionStatus::Paused)?;
            self.emit_lifecycle(&session, now);
            Ok(())
        } else {
            self.emit(Outbound::notice(
                MatchEvent::ResumeRequestDeclined {
                    session_id: id.clone(),
                    proposer_id: proposer.clone(),
                    target_id: user.clone(),
                    expires_at: offer.expires_at,
                },
                &proposer,
            ));
            Ok(())
        }
    }

    /// Invite the counterpart to start a waiting session under proposed
    /// terms.
    pub fn send_challenge(
        &self,
        id: &SessionId,
        user: &UserId,
        color_preference: ColorPreference,
        time_control: TimeControl,
        now: DateTime<Utc>,
    ) -> Result<NegotiationOffer, MatchError> {
        let entry = self.entry(id)?;
        let session = entry.lock();
        let side = self.guard(&session, user)?;
        Self::expect(&session, SessionStatus::Waiting, "send_challenge")?;
        let target = session.user_of(side.opponent()).clone();
        let offer = self.offers.issue(
            id.clone(),
            OfferKind::Challenge,
            user.clone(),
            target.clone(),
            ttl(self.config.challenge_ttl_secs),
            Some(ChallengeTerms {
                color_preference,
                time_control,
            }),
            now,
        )?;
        self.emit(Outbound::notice(
            MatchEvent::ChallengeSent {
                session_id: id.clone(),
                proposer_id: user.clone(),
                target_id: target.clone(),
                color_preference,
                time_control,
                expires_at: offer.expires_at,
            },
            &target,
        ));
        Ok(offer)
    }

    /// Answer a pending challenge. Accepting applies the proposed terms and
    /// begins play; declining just clears the slot so the challenger may
    /// reissue.
    pub fn respond_challenge(
        &self,
        id: &SessionId,
        user: &UserId,
        accept: bool,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let entry = self.entry(id)?;
        let mut session = entry.lock();
        let side = self.guard(&session, user)?;
        Self::expect(&session, SessionStatus::Waiting, "respond_challenge")?;
        let proposer = session.user_of(side.opponent()).clone();
        let offer = self.offers.take(id, &proposer, OfferKind::Challenge, now)?;
        if !accept {
            return Ok(());
        }
        if let Some(terms) = offer.terms {
            Self::apply_terms(&mut session, &proposer, &terms, now);
        }
        session.begin(now)?;
        self.commit(&session, SessionStatus::Waiting)?;
        self.emit_lifecycle(&session, now);
        Ok(())
    }

    /// Drop expired offers. Memory hygiene only; expiry itself is enforced
    /// lazily on every read.
    pub fn sweep_offers(&self, now: DateTime<Utc>) -> usize {
        self.offers.sweep(now)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// A point-in-time copy of a session.
    pub fn session_snapshot(&self, id: &SessionId) -> Result<Session, MatchError> {
        let entry = self.entry(id)?;
        let session = entry.lock();
        Ok(session.clone())
    }

    /// Wall-clock-derived remaining time per side. `None` means untimed.
    pub fn live_remaining(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<[Option<std::time::Duration>; 2], MatchError> {
        let entry = self.entry(id)?;
        let session = entry.lock();
        Ok([
            session.clock.live_remaining(Side::First, now),
            session.clock.live_remaining(Side::Second, now),
        ])
    }

    /// Presence snapshot: connectivity plus resumable sessions. Advisory,
    /// so a storage failure degrades to an empty listing rather than an
    /// error.
    #[must_use]
    pub fn presence(&self, user: &UserId) -> Presence {
        let sessions = match self.store.for_participant(user) {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(user_id = %user, error = %err, "presence lookup failed");
                Vec::new()
            }
        };
        Presence {
            user_id: user.clone(),
            online: self.identity.is_online(user),
            sessions,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn entry(&self, id: &SessionId) -> Result<Arc<Mutex<Session>>, MatchError> {
        if let Some(found) = self.sessions.get(id) {
            return Ok(found.clone());
        }
        let loaded = self
            .store
            .load(id)
            .map_err(|err| Self::store_error(id, err))?
            .ok_or_else(|| MatchError::SessionNotFound {
                session_id: id.clone(),
            })?;
        Ok(self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(loaded)))
            .clone())
    }

    fn guard(&self, session: &Session, user: &UserId) -> Result<Side, MatchError> {
        if !self.identity.is_participant(user, session) {
            return Err(MatchError::NotParticipant {
                session_id: session.id.clone(),
                user_id: user.clone(),
            });
        }
        session
            .side_of(user)
            .ok_or_else(|| MatchError::NotParticipant {
                session_id: session.id.clone(),
                user_id: user.clone(),
            })
    }

    fn expect(
        session: &Session,
        expected: SessionStatus,
        operation: &'static str,
    ) -> Result<(), MatchError> {
        if session.status == expected {
            Ok(())
        } else {
            Err(MatchError::InvalidState {
                session_id: session.id.clone(),
                status: session.status,
                operation,
            })
        }
    }

    /// Persist a committed transition, conditional on the status the session
    /// held before it.
    fn commit(&self, session: &Session, prior: SessionStatus) -> Result<(), MatchError> {
        self.store
            .save(session, Some(prior))
            .map_err(|err| Self::store_error(&session.id, err))
    }

    /// Terminal bookkeeping shared by every finishing path: clear pending
    /// offers, persist, announce.
    fn finalize(
        &self,
        session: &Session,
        prior: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), MatchError> {
        let _ = self.offers.clear_session(&session.id);
        self.commit(session, prior)?;
        info!(
            session_id = %session.id,
            result = ?session.result,
            end_reason = ?session.end_reason,
            "session finished"
        );
        self.emit_lifecycle(session, now);
        Ok(())
    }

    fn forfeit_abandonment(&self, session: &mut Session, now: DateTime<Utc>) -> bool {
        let offline: Vec<Side> = [Side::First, Side::Second]
            .into_iter()
            .filter(|side| !self.identity.is_online(session.user_of(*side)))
            .collect();
        match offline.as_slice() {
            // Both present yet idle beyond the ceiling: nobody abandoned
            [] => false,
            [loser] => {
                // finish requires active; a paused session is briefly
                // resumed so the forfeit carries a result
                session.resume(now).is_ok()
                    && session
                        .finish(TerminalCause::Abandonment { loser: *loser }, now)
                        .is_ok()
                    && self.finalize(session, SessionStatus::Paused, now).is_ok()
            }
            _ => {
                // Both gone: no one to award the match to
                let applied = session.abort(now).is_ok()
                    && self.commit(session, SessionStatus::Paused).is_ok();
                if applied {
                    let _ = self.offers.clear_session(&session.id);
                    info!(session_id = %session.id, "session abandoned by both, aborted");
                    self.emit_lifecycle(session, now);
                }
                applied
            }
        }
    }

    /// Apply accepted challenge terms: side assignment and a fresh clock.
    fn apply_terms(
        session: &mut Session,
        proposer: &UserId,
        terms: &ChallengeTerms,
        now: DateTime<Utc>,
    ) {
        let wanted = match terms.color_preference {
            ColorPreference::First => Some(Side::First),
            ColorPreference::Second => Some(Side::Second),
            ColorPreference::Random => None,
        };
        if let Some(side) = wanted {
            if session.side_of(proposer) != Some(side) {
                std::mem::swap(&mut session.first, &mut session.second);
            }
        }
        session.clock = ClockState::new(
            ClockConfig::Multiplayer {
                initial_secs: terms.time_control.initial_secs,
                increment_secs: terms.time_control.increment_secs,
            },
            now,
        );
    }

    fn emit_lifecycle(&self, session: &Session, now: DateTime<Utc>) {
        self.emit(Outbound::lifecycle(
            session.status_event(now),
            &session.first,
            &session.second,
        ));
    }

    fn emit(&self, outbound: Outbound) {
        // Fire-and-forget: no subscribers is not an error
        let _ = self.events.send(outbound);
    }

    fn store_error(id: &SessionId, err: StoreError) -> MatchError {
        match err {
            StoreError::StatusConflict {
                session_id, actual, ..
            } => MatchError::Conflict {
                session_id,
                detail: format!("persisted status is already {actual}"),
            },
            StoreError::Missing { session_id } => MatchError::SessionNotFound { session_id },
            StoreError::Backend(message) => {
                warn!(session_id = %id, %message, "storage backend failure");
                MatchError::Conflict {
                    session_id: id.clone(),
                    detail: format!("storage backend failure: {message}"),
                }
            }
        }
    }
}

fn ttl(secs: u64) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
