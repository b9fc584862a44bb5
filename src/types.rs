//! Core types for the progression ledger
//!
//! All types are designed for:
//! - Deterministic serialization (serde_json, one event per line)
//! - Exact arithmetic (integer cents for money)
//! - Full-state reconstruction from the event log

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal level. No further transitions once reached.
pub const MAX_LEVEL: u8 = 11;

/// Highest difficulty bin index.
pub const MAX_BIN: u8 = 21;

/// Consolidated per-entity state, derived from events.
///
/// Persisted as a single JSON document under `snapshots/{mech_id}.json`.
/// A snapshot is never authoritative over the event log: a stale or corrupt
/// snapshot is always recoverable via full replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Entity this snapshot belongs to
    pub mech_id: String,

    /// Current level (1..=11, monotonically non-decreasing)
    pub level: u8,

    /// Evolution accumulator in cents (never decays)
    pub evo_acc: i64,

    /// Power accumulator in cents (reduced by time decay)
    pub power_acc: i64,

    /// Evolution threshold for the next level, in cents (0 at terminal level)
    pub goal_requirement: i64,

    /// Difficulty bin the current goal was computed with (1..=21)
    pub difficulty_bin: u8,

    /// Anchor timestamp for power decay
    pub goal_started_at: DateTime<Utc>,

    /// Decay rate applied to `power_acc`, in cents per day
    pub power_decay_per_day: i64,

    /// Monotonic counter bumped on every mutation
    pub version: u64,

    /// Sequence number of the last event folded into this snapshot
    pub last_event_seq: u64,

    /// Mech variant, selects the decay rate table entry
    pub mech_type: String,

    /// Last externally supplied member-count sample
    pub last_user_count_sample: i64,

    /// Lifetime donation total in cents (monotonic, never decreases)
    pub cumulative_donations_cents: i64,
}

/// Immutable domain event, one JSON object per line in `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Global monotonic sequence number (unique, gapless)
    pub seq: u64,

    /// Event timestamp (UTC)
    pub ts: DateTime<Utc>,

    /// Entity the event belongs to
    pub mech_id: String,

    /// Typed payload
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payloads, tagged by `type` with fields under `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    /// Ordinary donation: feeds evolution and power
    DonationAdded {
        /// Unique donation id (UUIDv7 for time-ordering)
        donation_id: Uuid,
        /// Deduplication key (caller-supplied or derived)
        idempotency_key: String,
        /// Donation amount in cents
        units: i64,
        /// Donor display name
        donor: String,
        /// Originating channel, if any
        channel_id: Option<String>,
    },

    /// Power-only donation issued by the system (evolution untouched)
    SystemDonationAdded {
        /// Derived deduplication key, recorded for audit
        idempotency_key: String,
        /// Power amount in cents
        power_units: i64,
        /// Name of the triggering event
        event_name: String,
        /// Free-form description
        description: String,
    },

    /// Committed level transition (derived marker, re-derived on replay)
    LevelUpCommitted {
        /// Level before the transition
        from_level: u8,
        /// Level after the transition
        to_level: u8,
        /// Requirement that was crossed, in cents
        old_goal_requirement: i64,
        /// Whether the threshold was hit exactly
        exact_hit: bool,
    },

    /// Bonus granted for landing exactly on the threshold
    ExactHitBonusGranted {
        /// Bonus amount in cents
        power_units: i64,
        /// Level before the exact hit
        from_level: u8,
        /// Level after the exact hit
        to_level: u8,
        /// Human-readable grant reason
        reason: String,
    },

    /// At-most-once-per-campaign power grant
    PowerGiftGranted {
        /// Campaign the grant belongs to
        campaign_id: String,
        /// Granted amount in cents
        power_units: i64,
    },

    /// Externally supplied population sample
    MemberCountUpdated {
        /// Clamped member count
        member_count: i64,
    },

    /// Tombstone: logically deletes a prior event without removing it.
    /// Tombstoning a tombstone undeletes its target.
    DonationDeleted {
        /// Sequence number of the deleted event
        deleted_seq: u64,
        /// Donor of the deleted event, if known
        donor: Option<String>,
        /// Amount of the deleted event in cents, if known
        units: Option<i64>,
        /// Deletion reason
        reason: String,
        /// Type name of the deleted event
        original_type: String,
    },
}

impl EventKind {
    /// Stable type name, matching the on-disk `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::DonationAdded { .. } => "DonationAdded",
            EventKind::SystemDonationAdded { .. } => "SystemDonationAdded",
            EventKind::LevelUpCommitted { .. } => "LevelUpCommitted",
            EventKind::ExactHitBonusGranted { .. } => "ExactHitBonusGranted",
            EventKind::PowerGiftGranted { .. } => "PowerGiftGranted",
            EventKind::MemberCountUpdated { .. } => "MemberCountUpdated",
            EventKind::DonationDeleted { .. } => "DonationDeleted",
        }
    }

    /// Whether this event may be targeted by a tombstone.
    ///
    /// Tombstones themselves are included so that deleting a tombstone
    /// restores its target.
    pub fn is_deletable(&self) -> bool {
        matches!(
            self,
            EventKind::DonationAdded { .. }
                | EventKind::SystemDonationAdded { .. }
                | EventKind::PowerGiftGranted { .. }
                | EventKind::ExactHitBonusGranted { .. }
                | EventKind::DonationDeleted { .. }
        )
    }
}

/// One committed level transition, in cascade order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelUp {
    /// Level before the transition
    pub from_level: u8,
    /// Level after the transition
    pub to_level: u8,
    /// Requirement that was crossed, in cents
    pub old_goal_requirement: i64,
    /// Whether the threshold was hit exactly
    pub exact_hit: bool,
}

/// Bonus record for an exact threshold hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactHitBonus {
    /// Bonus amount in cents
    pub power_units: i64,
    /// Level before the exact hit
    pub from_level: u8,
    /// Level after the exact hit
    pub to_level: u8,
}

/// Result of applying donation units to a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DonationOutcome {
    /// Committed transitions with strictly increasing `to_level`
    pub level_ups: Vec<LevelUp>,
    /// At most one bonus: the last exact hit of the cascade
    pub bonus: Option<ExactHitBonus>,
}

/// Read-only projection handed back to callers (dollars and percentages).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayState {
    /// Entity id
    pub mech_id: String,
    /// Current level
    pub level: u8,
    /// Mech variant
    pub mech_type: String,
    /// Evolution accumulator in dollars
    pub evolution: Decimal,
    /// Power accumulator in dollars, with continuous decay applied
    pub power: Decimal,
    /// Next-level requirement in dollars (zero at terminal level)
    pub goal: Decimal,
    /// Lifetime donation total in dollars
    pub cumulative_donations: Decimal,
    /// Evolution progress toward the goal, 0..=100
    pub evolution_percent: f64,
    /// Power relative to the goal, clamped below 100 except at terminal level
    pub power_percent: f64,
    /// Whether the terminal level has been reached
    pub at_max_level: bool,
    /// Last member-count sample folded into the snapshot
    pub member_count: i64,
    /// Snapshot version the projection was taken from
    pub version: u64,
}
