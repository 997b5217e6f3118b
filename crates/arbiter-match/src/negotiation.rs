//! Time-boxed negotiation offers.
//!
//! Draw offers, resume requests, and challenges share one shape: a proposer,
//! a target, and a TTL. At most one pending offer exists per
//! `(session, proposer, kind)`; a second issue while one is pending is a
//! `Conflict`, and an expired offer is replaceable in place.
//!
//! Expiry is lazy. Every read re-checks `expires_at` against the caller's
//! clock, so correctness never depends on the periodic sweep; the sweep only
//! reclaims memory for offers nobody touched again.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use arbiter_core::{ColorPreference, MatchError, OfferId, SessionId, TimeControl, UserId};

/// What is being negotiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferKind {
    /// Offer to end the match as a draw.
    Draw,
    /// Request to resume a paused match.
    Resume,
    /// Invitation to start a new match.
    Challenge,
}

impl OfferKind {
    /// Label used in logs and conflict details.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draw => "draw",
            Self::Resume => "resume",
            Self::Challenge => "challenge",
        }
    }
}

/// Whether an offer is still answerable at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OfferState {
    /// Within its TTL and awaiting a response.
    Pending,
    /// TTL elapsed; responding yields `Expired`.
    Expired,
}

/// The match terms attached to a challenge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeTerms {
    /// Which side the challenger wants.
    pub color_preference: ColorPreference,
    /// Proposed clock settings.
    pub time_control: TimeControl,
}

/// One outstanding offer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NegotiationOffer {
    /// Unique per issuance; a reissue after expiry gets a fresh id.
    pub id: OfferId,
    /// Session the offer belongs to.
    pub session_id: SessionId,
    /// What is being negotiated.
    pub kind: OfferKind,
    /// Who issued the offer.
    pub proposer: UserId,
    /// Who may accept or decline it.
    pub target: UserId,
    /// When the offer was issued.
    pub issued_at: DateTime<Utc>,
    /// Instant after which the offer is no longer answerable.
    pub expires_at: DateTime<Utc>,
    /// Present for challenges only.
    pub terms: Option<ChallengeTerms>,
}

impl NegotiationOffer {
    /// Pending or expired, judged against the caller's clock.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> OfferState {
        if now < self.expires_at {
            OfferState::Pending
        } else {
            OfferState::Expired
        }
    }
}

type OfferKey = (SessionId, UserId, OfferKind);

/// Concurrent store of pending offers, keyed by `(session, proposer, kind)`.
#[derive(Debug, Default)]
pub struct NegotiationStore {
    offers: DashMap<OfferKey, NegotiationOffer>,
}

impl NegotiationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue an offer. Fails with `Conflict` when the proposer already has
    /// a pending, unexpired offer of this kind on the session; an expired
    /// one is replaced in place.
    pub fn issue(
        &self,
        session_id: SessionId,
        kind: OfferKind,
        proposer: UserId,
        target: UserId,
        ttl: TimeDelta,
        terms: Option<ChallengeTerms>,
        now: DateTime<Utc>,
    ) -> Result<NegotiationOffer, MatchError> {
        let key = (session_id.clone(), proposer.clone(), kind);
        let offer = NegotiationOffer {
            id: OfferId::new(),
            session_id,
            kind,
            proposer,
            target,
            issued_at: now,
            expires_at: now + ttl,
            terms,
        };
        match self.offers.entry(key) {
            Entry::Occupied(mut slot) => {
                // An occupied slot is only reusable once its offer has lapsed
                if slot.get().state(now) == OfferState::Pending {
                    return Err(MatchError::pending_offer(offer.session_id));
                }
                debug!(
                    session_id = %offer.session_id,
                    kind = kind.as_str(),
                    replaced = %slot.get().id,
                    "replacing expired offer"
                );
                let _ = slot.insert(offer.clone());
                Ok(offer)
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(offer.clone());
                Ok(offer)
            }
        }
    }

    /// Remove and return the offer a responder is answering. Absent offers
    /// are `OfferNotFound`; lapsed ones are removed and reported `Expired`,
    /// so the proposer may reissue immediately.
    pub fn take(
        &self,
        session_id: &SessionId,
        proposer: &UserId,
        kind: OfferKind,
        now: DateTime<Utc>,
    ) -> Result<NegotiationOffer, MatchError> {
        let key = (session_id.clone(), proposer.clone(), kind);
        let (_, offer) = self
            .offers
            .remove(&key)
            .ok_or_else(|| MatchError::OfferNotFound {
                session_id: session_id.clone(),
            })?;
        match offer.state(now) {
            OfferState::Pending => Ok(offer),
            OfferState::Expired => Err(MatchError::Expired {
                session_id: session_id.clone(),
            }),
        }
    }

    /// The proposer's pending offer of a kind, if one is still live.
    #[must_use]
    pub fn pending(
        &self,
        session_id: &SessionId,
        proposer: &UserId,
        kind: OfferKind,
        now: DateTime<Utc>,
    ) -> Option<NegotiationOffer> {
        let key = (session_id.clone(), proposer.clone(), kind);
        let offer = self.offers.get(&key)?;
        (offer.state(now) == OfferState::Pending).then(|| offer.clone())
    }

    /// Drop every expired offer. Returns how many were reclaimed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.offers.len();
        self.offers
            .retain(|_, offer| offer.state(now) == OfferState::Pending);
        let swept = before.saturating_sub(self.offers.len());
        if swept > 0 {
            debug!(swept, "reclaimed expired offers");
        }
        swept
    }

    /// Drop every offer attached to a session; called on terminal
    /// transitions so stale offers cannot outlive their match.
    pub fn clear_session(&self, session_id: &SessionId) -> usize {
        let before = self.offers.len();
        self.offers.retain(|(sid, _, _), _| sid != session_id);
        before.saturating_sub(self.offers.len())
    }

    /// Number of stored offers, live or lapsed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offers.len()
    }

    /// Whether the store holds no offers at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn t0() -> DateTime<Utc> {
        "2026-03-01T12:00:00Z".parse().unwrap()
    }

    fn ttl() -> TimeDelta {
        TimeDelta::seconds(300)
    }

    fn issue_draw(store: &NegotiationStore, now: DateTime<Utc>) -> NegotiationOffer {
        store
            .issue(
                SessionId::from("s1"),
                OfferKind::Draw,
                UserId::from("alice"),
                UserId::from("bob"),
                ttl(),
                None,
                now,
            )
            .unwrap()
    }

    #[test]
    fn issue_then_take_pending() {
        let store = NegotiationStore::new();
        let offer = issue_draw(&store, t0());
        assert_eq!(offer.expires_at, t0() + ttl());

        let taken = store
            .take(
                &SessionId::from("s1"),
                &UserId::from("alice"),
                OfferKind::Draw,
                t0() + TimeDelta::seconds(10),
            )
            .unwrap();
        assert_eq!(taken.id, offer.id);
        assert!(store.is_empty());
    }

    #[test]
    fn duplicate_pending_issue_is_conflict() {
        let store = NegotiationStore::new();
        let _ = issue_draw(&store, t0());
        let err = store
            .issue(
                SessionId::from("s1"),
                OfferKind::Draw,
                UserId::from("alice"),
                UserId::from("bob"),
                ttl(),
                None,
                t0() + TimeDelta::seconds(1),
            )
            .unwrap_err();
        assert_matches!(err, MatchError::Conflict { .. });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn different_kinds_coexist() {
        let store = NegotiationStore::new();
        let _ = issue_draw(&store, t0());
        let _ = store
            .issue(
                SessionId::from("s1"),
                OfferKind::Resume,
                UserId::from("alice"),
                UserId::from("bob"),
                ttl(),
                None,
                t0(),
            )
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn opposing_proposers_coexist() {
        let store = NegotiationStore::new();
        let _ = issue_draw(&store, t0());
        let _ = store
            .issue(
                SessionId::from("s1"),
                OfferKind::Draw,
                UserId::from("bob"),
                UserId::from("alice"),
                ttl(),
                None,
                t0(),
            )
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn expired_offer_take_reports_expired_and_removes() {
        let store = NegotiationStore::new();
        let _ = issue_draw(&store, t0());
        let late = t0() + ttl() + TimeDelta::seconds(1);
        let err = store
            .take(
                &SessionId::from("s1"),
                &UserId::from("alice"),
                OfferKind::Draw,
                late,
            )
            .unwrap_err();
        assert_matches!(err, MatchError::Expired { .. });
        // Removed on detection, so a retry is not-found rather than expired
        let err = store
            .take(
                &SessionId::from("s1"),
                &UserId::from("alice"),
                OfferKind::Draw,
                late,
            )
            .unwrap_err();
        assert_matches!(err, MatchError::OfferNotFound { .. });
    }

    #[test]
    fn boundary_instant_is_expired() {
        let store = NegotiationStore::new();
        let offer = issue_draw(&store, t0());
        assert_eq!(offer.state(offer.expires_at), OfferState::Expired);
        assert_eq!(
            offer.state(offer.expires_at - TimeDelta::milliseconds(1)),
            OfferState::Pending
        );
    }

    #[test]
    fn reissue_after_expiry_replaces_with_fresh_id() {
        let store = NegotiationStore::new();
        let first = issue_draw(&store, t0());
        let later = t0() + ttl() + TimeDelta::seconds(5);
        let second = issue_draw(&store, later);
        assert_ne!(second.id, first.id);
        assert_eq!(second.expires_at, later + ttl());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn take_missing_offer_is_not_found() {
        let store = NegotiationStore::new();
        let err = store
            .take(
                &SessionId::from("s1"),
                &UserId::from("alice"),
                OfferKind::Draw,
                t0(),
            )
            .unwrap_err();
        assert_matches!(err, MatchError::OfferNotFound { .. });
    }

    #[test]
    fn pending_lookup_honors_ttl() {
        let store = NegotiationStore::new();
        let _ = issue_draw(&store, t0());
        assert!(store
            .pending(
                &SessionId::from("s1"),
                &UserId::from("alice"),
                OfferKind::Draw,
                t0() + TimeDelta::seconds(10),
            )
            .is_some());
        assert!(store
            .pending(
                &SessionId::from("s1"),
                &UserId::from("alice"),
                OfferKind::Draw,
                t0() + ttl(),
            )
            .is_none());
    }

    #[test]
    fn sweep_reclaims_only_lapsed() {
        let store = NegotiationStore::new();
        let _ = issue_draw(&store, t0());
        let _ = store
            .issue(
                SessionId::from("s2"),
                OfferKind::Draw,
                UserId::from("carol"),
                UserId::from("dave"),
                TimeDelta::seconds(10),
                None,
                t0(),
            )
            .unwrap();

        let swept = store.sweep(t0() + TimeDelta::seconds(30));
        assert_eq!(swept, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clear_session_drops_all_kinds() {
        let store = NegotiationStore::new();
        let _ = issue_draw(&store, t0());
        let _ = store
            .issue(
                SessionId::from("s1"),
                OfferKind::Resume,
                UserId::from("bob"),
                UserId::from("alice"),
                ttl(),
                None,
                t0(),
            )
            .unwrap();
        let _ = store
            .issue(
                SessionId::from("s2"),
                OfferKind::Draw,
                UserId::from("carol"),
                UserId::from("dave"),
                ttl(),
                None,
                t0(),
            )
            .unwrap();

        assert_eq!(store.clear_session(&SessionId::from("s1")), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn challenge_carries_terms() {
        let store = NegotiationStore::new();
        let offer = store
            .issue(
                SessionId::from("s3"),
                OfferKind::Challenge,
                UserId::from("alice"),
                UserId::from("bob"),
                ttl(),
                Some(ChallengeTerms {
                    color_preference: ColorPreference::Random,
                    time_control: TimeControl {
                        initial_secs: 300,
                        increment_secs: 2,
                    },
                }),
                t0(),
            )
            .unwrap();
        let terms = offer.terms.unwrap();
        assert_eq!(terms.color_preference, ColorPreference::Random);
        assert_eq!(terms.time_control.initial_secs, 300);
    }
}
