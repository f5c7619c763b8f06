//! Per-entity lifecycle state machine
//!
//! ```text
//!            Observe                 Observe(deletion timestamp)
//!   Absent ───────────▶ Active ─────────────────────────────▶ Terminating
//!     ▲                   │                                        │
//!     │      NotFound     │                NotFound                │
//!     └───────────────────┴────────────────────────────────────────┘
//! ```
//!
//! `Absent` after a not-found is kept as a short-lived `Gone` tombstone so
//! that an older, still in-flight observe for the same identity is
//! discarded instead of resurrecting the record. Every signal carries the
//! sequence number it was dispatched with:
//!
//! - removals always apply (idempotent, commutative) and never lower the
//!   recorded sequence;
//! - an observe older than the recorded sequence is discarded;
//! - a newer observe from `Terminating`/`Gone` is a recreated entity.
//!
//! Because removals always apply, a removal older than the last observe
//! (for example the delete of a previous run arriving after the recreated
//! run with the same name was observed) clears a live record while the
//! phase stays `Active`. The router reports this as
//! [`Outcome::Superseded`](crate::Outcome::Superseded) and the
//! worker fetches the identity again. Without that follow-up the record
//! would stay missing until the next resync lists it.

/// Phase of an entity as seen by the router (`Absent` = no entry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityPhase {
    /// Record present, entity exists and is not terminating
    Active,

    /// Entity exists with a deletion timestamp; record cleared
    Terminating,

    /// Entity confirmed gone; remembered only to fence stale updates
    Gone,
}

impl EntityPhase {
    /// Get the phase name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityPhase::Active => "active",
            EntityPhase::Terminating => "terminating",
            EntityPhase::Gone => "gone",
        }
    }
}

/// Lifecycle signal for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Entity exists without a deletion timestamp
    Observe,

    /// Entity exists with a deletion timestamp
    SoftDelete,

    /// Entity could not be found
    HardDelete,
}

/// What the router must do to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Classify and replace the record
    Upsert,

    /// Remove the record (no-op if absent)
    Remove,

    /// Ignore the signal; a newer one already won
    Discard,
}

/// Recorded phase plus the sequence number that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseState {
    /// Current phase
    pub phase: EntityPhase,

    /// Highest sequence applied for the identity
    pub seq: u64,
}

/// Outcome of [`transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Store action to perform
    pub action: Action,

    /// Phase state to record afterwards
    pub next: PhaseState,
}

/// Compute the next phase for `signal` dispatched at `seq`
pub fn transition(current: Option<PhaseState>, signal: Signal, seq: u64) -> Transition {
    let stale = current.map(|c| seq < c.seq).unwrap_or(false);

    match signal {
        Signal::Observe => match current {
            Some(state) if stale => Transition {
                action: Action::Discard,
                next: state,
            },
            _ => Transition {
                action: Action::Upsert,
                next: PhaseState {
                    phase: EntityPhase::Active,
                    seq,
                },
            },
        },
        Signal::SoftDelete | Signal::HardDelete => {
            let phase = if signal == Signal::SoftDelete {
                EntityPhase::Terminating
            } else {
                EntityPhase::Gone
            };
            let next = match current {
                Some(state) if stale => state,
                _ => PhaseState { phase, seq },
            };
            Transition {
                action: Action::Remove,
                next,
            }
        }
    }
}
