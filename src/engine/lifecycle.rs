//! Lifecycle of a cached counter record.
//!
//! ```text
//! Absent ──create/rehydrate──▶ Created ──mutate──▶ Active
//!                                 │                  │
//!                                 └──────expire──────┴──▶ Expired ──rehydrate──▶ Created
//! Created | Active | Expired ──delete──▶ Deleted ──create──▶ Created
//! ```

use crate::error::{Error, Result};
use std::fmt;

/// Observed state of a counter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordState {
    /// Never created.
    Absent,
    /// Cached with initial values.
    Created,
    /// Cached and mutated at least once.
    Active,
    /// Authoritative record exists, cached copy timed out.
    Expired,
    /// Entity deleted.
    Deleted,
}

/// Event moving a record between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Entity creation.
    Create,
    /// Counter mutation.
    Mutate,
    /// TTL elapsed.
    Expire,
    /// Cache-miss repopulation.
    Rehydrate,
    /// Entity deletion.
    Delete,
}

impl RecordState {
    /// Applies a transition, rejecting the illegal ones.
    ///
    /// Mutations of uncached records are existence-gated no-ops, so
    /// `Mutate` leaves `Absent`, `Expired` and `Deleted` unchanged.
    pub fn transition(self, t: Transition) -> Result<RecordState> {
        use RecordState::*;
        use Transition::*;
        let next = match (self, t) {
            (Absent | Deleted, Create) => Created,
            (Absent, Rehydrate) | (Expired, Rehydrate) => Created,
            (Created, Rehydrate) => Created,
            (Active, Rehydrate) => Active,
            (Created | Active, Mutate) => Active,
            (Absent | Expired | Deleted, Mutate) => self,
            (Created | Active | Expired, Expire) => Expired,
            (Absent | Deleted, Expire) => self,
            (Created | Active | Expired | Deleted, Delete) => Deleted,
            (Created | Active | Expired, Create) => {
                return Err(Error::invalid_state(format!("cannot create: record is {}", self)));
            }
            (Deleted, Rehydrate) => {
                return Err(Error::invalid_state("cannot rehydrate a deleted record"));
            }
            (Absent, Delete) => {
                return Err(Error::invalid_state("cannot delete an absent record"));
            }
        };
        Ok(next)
    }

    /// Returns true if the record has a live cached copy.
    pub fn is_cached(self) -> bool {
        matches!(self, RecordState::Created | RecordState::Active)
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordState::Absent => "absent",
            RecordState::Created => "created",
            RecordState::Active => "active",
            RecordState::Expired => "expired",
            RecordState::Deleted => "deleted",
        };
        f.write_str(name)
    }
}
