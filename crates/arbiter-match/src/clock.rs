//! Per-side match clocks.
//!
//! Remaining time is derived from wall-clock deltas against the last flip
//! timestamp instead of continuous writes: the stored budget only changes
//! when the turn flips or the clock stops, and live remaining time is
//! recomputed on read. Flag fall is detected by the ticker
//! ([`crate::ticker::ClockTicker`]) and raised into the state machine as a
//! timeout termination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use arbiter_core::Side;

/// Clock behavior, selected once at construction.
///
/// An explicit sum type: the single-player and multiplayer variants are
/// never inferred from the shape of an input object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClockConfig {
    /// Solo play against an untimed opponent (engine, puzzle): only the
    /// first side carries a budget.
    SinglePlayer {
        /// Budget for the timed side, in seconds.
        budget_secs: u64,
    },
    /// Both sides timed, with an optional per-move increment.
    Multiplayer {
        /// Starting budget per side, in seconds.
        initial_secs: u64,
        /// Increment credited to the mover after each accepted move,
        /// in seconds.
        increment_secs: u64,
    },
}

/// The live clock state of one session.
///
/// `remaining` holds the budget as of `last_flip_at`; a `None` side is
/// untimed and can never flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    remaining: [Option<Duration>; 2],
    increment: Duration,
    /// Whose move it is.
    turn: Side,
    /// Whether the active side's clock is running.
    running: bool,
    last_flip_at: DateTime<Utc>,
}

impl ClockState {
    /// Create a stopped clock from a config.
    #[must_use]
    pub fn new(config: ClockConfig, now: DateTime<Utc>) -> Self {
        let (remaining, increment) = match config {
            ClockConfig::SinglePlayer { budget_secs } => {
                ([Some(Duration::from_secs(budget_secs)), None], Duration::ZERO)
            }
            ClockConfig::Multiplayer {
                initial_secs,
                increment_secs,
            } => (
                [
                    Some(Duration::from_secs(initial_secs)),
                    Some(Duration::from_secs(initial_secs)),
                ],
                Duration::from_secs(increment_secs),
            ),
        };
        Self {
            remaining,
            increment,
            turn: Side::First,
            running: false,
            last_flip_at: now,
        }
    }

    /// Whose move it is.
    #[must_use]
    pub fn turn(&self) -> Side {
        self.turn
    }

    /// Whether the clock is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start the clock (play begins). No-op if already running.
    pub fn start(&mut self, now: DateTime<Utc>) {
        if !self.running {
            self.running = true;
            self.last_flip_at = now;
        }
    }

    /// Stop the clock, charging the active side's elapsed time first.
    /// No-op if already stopped.
    pub fn halt(&mut self, now: DateTime<Utc>) {
        if self.running {
            self.charge_elapsed(now);
            self.running = false;
        }
    }

    /// Charge the mover's elapsed time, credit the increment, and flip the
    /// turn. Only meaningful while running.
    pub fn flip(&mut self, now: DateTime<Utc>) {
        if !self.running {
            return;
        }
        self.charge_elapsed(now);
        if let Some(budget) = &mut self.remaining[self.turn.index()] {
            *budget = budget.saturating_add(self.increment);
        }
        self.turn = self.turn.opponent();
    }

    /// Live remaining time for a side, or `None` for an untimed side.
    #[must_use]
    pub fn live_remaining(&self, side: Side, now: DateTime<Utc>) -> Option<Duration> {
        let budget = self.remaining[side.index()]?;
        if self.running && side == self.turn {
            Some(budget.saturating_sub(self.elapsed(now)))
        } else {
            Some(budget)
        }
    }

    /// The side whose flag has fallen, if any.
    ///
    /// Only a running clock can flag; paused and waiting sessions are
    /// excluded by never running their clocks.
    #[must_use]
    pub fn flag_fallen(&self, now: DateTime<Utc>) -> Option<Side> {
        if !self.running {
            return None;
        }
        match self.live_remaining(self.turn, now) {
            Some(rem) if rem.is_zero() => Some(self.turn),
            _ => None,
        }
    }

    fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_flip_at).to_std().unwrap_or_default()
    }

    fn charge_elapsed(&mut self, now: DateTime<Utc>) {
        let elapsed = self.elapsed(now);
        if let Some(budget) = &mut self.remaining[self.turn.index()] {
            *budget = budget.saturating_sub(elapsed);
        }
        self.last_flip_at = now;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
