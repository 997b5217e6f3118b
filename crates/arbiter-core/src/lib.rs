//! # arbiter-core
//!
//! Foundation types for the arbiter live-match session layer.
//!
//! This crate provides the shared vocabulary the other arbiter crates depend on:
//!
//! - **Branded IDs**: `SessionId`, `UserId`, `OfferId`, `ConnectionId` as
//!   newtypes for type safety
//! - **Match vocabulary**: `SessionStatus`, `MatchResult`, `EndReason`,
//!   `Side`, `PauseKind`
//! - **Errors**: the `MatchError` taxonomy with machine-readable wire codes
//! - **Events**: the `MatchEvent` wire contract, channel names, and the
//!   `Outbound` envelope routed to the broadcaster
//! - **Logging**: the shared `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod state;

pub use errors::{MatchError, MatchErrorCode};
pub use events::{Channel, ColorPreference, MatchEvent, Outbound, TimeControl};
pub use ids::{ConnectionId, OfferId, SessionId, UserId};
pub use state::{EndReason, MatchResult, PauseKind, SessionStatus, Side};
