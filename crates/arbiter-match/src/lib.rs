//! # arbiter-match
//!
//! The authoritative session layer for a two-player match: lifecycle state
//! machine, per-side clocks with flag-fall, time-boxed negotiation offers
//! (draw / resume / challenge), and the [`SessionManager`] that serializes
//! every mutation per session and hands accepted transitions to the event
//! fan-out.
//!
//! Each session is the unit of serialization: all transitions and
//! negotiation resolutions on a session are applied under its own lock, so
//! two concurrent terminating causes resolve first-committer-wins and the
//! loser observes a `Conflict`.

#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod identity;
pub mod manager;
pub mod negotiation;
pub mod session;
pub mod store;
pub mod ticker;

pub use clock::{ClockConfig, ClockState};
pub use config::MatchConfig;
pub use identity::{Identity, MemoryIdentity};
pub use manager::{Presence, SessionManager};
pub use negotiation::{ChallengeTerms, NegotiationOffer, NegotiationStore, OfferKind, OfferState};
pub use session::{RulesVerdict, Session, TerminalCause};
pub use store::{MemorySessionStore, SessionStore, StoreError};
pub use ticker::{ClockTicker, TickerResult};
