//! Mech Progression Ledger
//!
//! Event-sourced donation ledger: monetary events accumulate into two
//! parallel integer-cents counters (decaying power, non-decaying evolution)
//! per tracked entity, with discrete level transitions, deterministic
//! idempotent replay, and crash recovery via an immutable append-only log
//! plus atomically written snapshots.
//!
//! # Architecture
//!
//! - **Event Sourcing**: All state is derived from immutable events
//! - **Single Writer**: One exclusive lock serializes every read-modify-write;
//!   exactly one process may own a given on-disk log
//! - **Tombstones**: Deletion is a compensating event, never a rewrite;
//!   tombstoning a tombstone undeletes
//! - **Atomic Snapshots**: tmp-file + rename, always repairable by full replay
//!
//! # Invariants
//!
//! - `0 <= evo_acc < goal_requirement` at rest; `power_acc >= 0`
//! - Levels only move forward, capped at the terminal level
//! - `cumulative_donations_cents` never decreases
//! - Deterministic replay: same events, same snapshot bytes

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod paths;
pub mod policy;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{ConfigCache, GameConfig};
pub use error::{Error, Result};
pub use ledger::MechLedger;
pub use paths::StorePaths;
pub use policy::{Clock, CostMode, CostPolicy, ManualClock, MemberCountSource, SystemClock};
pub use types::{DisplayState, Event, EventKind, Snapshot, MAX_BIN, MAX_LEVEL};
