//! Main ledger orchestration layer
//!
//! This module ties together the path resolver, config cache, event log,
//! snapshot store, and domain engine into the public API for donation
//! processing.
//!
//! Every operation runs under one exclusive lock covering the whole
//! read-append-mutate-persist sequence. The design assumes a single process
//! owns mutation of a given on-disk log; the in-process lock does not make
//! concurrent writers across processes safe.
//!
//! # Example
//!
//! ```no_run
//! use mech_ledger::{GameConfig, MechLedger};
//! use rust_decimal::Decimal;
//!
//! fn main() -> mech_ledger::Result<()> {
//!     let ledger = MechLedger::open(None, GameConfig::default())?;
//!     let state = ledger.add_donation("mech-1", Decimal::new(500, 2), "alice", None, None)?;
//!     println!("level {} power {}", state.level, state.power);
//!     Ok(())
//! }
//! ```

use crate::config::{ConfigCache, GameConfig};
use crate::domain::{
    self, apply_donation_units, apply_gift_power, apply_system_power, compute_display_state,
    decayed_power, deterministic_gift, elapsed_seconds, new_snapshot,
};
use crate::error::{Error, Result};
use crate::paths::StorePaths;
use crate::policy::{Clock, CostPolicy, DynamicCost, FileMemberCount, MemberCountSource, SystemClock};
use crate::storage::{EventLog, SnapshotStore};
use crate::types::{DisplayState, Event, EventKind, Snapshot};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Largest accepted ordinary donation, in cents ($100,000).
pub const MAX_DONATION_CENTS: i64 = 10_000_000;

/// Largest accepted system donation, in cents ($500,000).
pub const MAX_SYSTEM_DONATION_CENTS: i64 = 50_000_000;

/// Longest accepted system event name.
pub const MAX_EVENT_NAME_LEN: usize = 64;

/// Longest accepted system donation description.
pub const MAX_DESCRIPTION_LEN: usize = 256;

/// Main ledger interface
pub struct MechLedger {
    /// Resolved storage locations
    paths: StorePaths,

    /// Cached game configuration
    config: ConfigCache,

    /// Append-only event log with sequence counter
    log: EventLog,

    /// Atomic per-entity snapshot store
    snapshots: SnapshotStore,

    /// Injected time source
    clock: Arc<dyn Clock>,

    /// Injected cost-mode provider
    cost_policy: Arc<dyn CostPolicy>,

    /// Injected member-count provider
    members: Arc<dyn MemberCountSource>,

    /// Serializes every read-modify-write sequence
    lock: Mutex<()>,
}

impl std::fmt::Debug for MechLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MechLedger")
            .field("paths", &self.paths)
            .finish_non_exhaustive()
    }
}

impl MechLedger {
    /// Open the ledger, resolving the storage root and creating any missing
    /// on-disk scaffolding.
    pub fn open(override_root: Option<&Path>, defaults: GameConfig) -> Result<Self> {
        let paths = StorePaths::resolve(override_root);
        paths.ensure(&defaults)?;

        let log = EventLog::open(&paths);
        let snapshots = SnapshotStore::open(&paths);
        let config = ConfigCache::new(paths.config_file(), defaults);
        let members = Arc::new(FileMemberCount::new(paths.member_count_file()));

        tracing::info!(root = %paths.root().display(), "Ledger opened");
        Ok(Self {
            paths,
            config,
            log,
            snapshots,
            clock: Arc::new(SystemClock),
            cost_policy: Arc::new(DynamicCost),
            members,
            lock: Mutex::new(()),
        })
    }

    /// Substitute the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Substitute the cost-mode provider.
    pub fn with_cost_policy(mut self, policy: Arc<dyn CostPolicy>) -> Self {
        self.cost_policy = policy;
        self
    }

    /// Substitute the member-count provider.
    pub fn with_member_source(mut self, members: Arc<dyn MemberCountSource>) -> Self {
        self.members = members;
        self
    }

    /// Resolved storage locations.
    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Cached configuration (load, refresh, timezone).
    pub fn config(&self) -> &ConfigCache {
        &self.config
    }

    // Public operations

    /// Current display state, creating the snapshot lazily on first access.
    ///
    /// The snapshot is persisted unchanged to keep the on-disk shape fresh;
    /// decay is projected for display only.
    pub fn get_state(&self, mech_id: &str) -> Result<DisplayState> {
        let _guard = self.lock.lock();
        let now = self.clock.now();

        let snapshot = self.load_or_init(mech_id, now)?;
        self.snapshots.persist(&snapshot)?;
        Ok(compute_display_state(&snapshot, now))
    }

    /// Record an ordinary donation: feeds evolution and power, may cascade
    /// through several level-ups, and deduplicates on the idempotency key.
    pub fn add_donation(
        &self,
        mech_id: &str,
        amount: Decimal,
        donor: &str,
        channel_id: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<DisplayState> {
        let cents = dollars_to_cents(amount)
            .ok_or_else(|| Error::InvalidAmount(format!("Unrepresentable amount: {amount}")))?;
        if cents <= 0 {
            return Err(Error::InvalidAmount("Amount must be positive".to_string()));
        }
        if cents > MAX_DONATION_CENTS {
            return Err(Error::InvalidAmount(format!(
                "Amount exceeds donation ceiling of {} cents",
                MAX_DONATION_CENTS
            )));
        }

        let _guard = self.lock.lock();
        let now = self.clock.now();
        let mut snapshot = self.load_or_init(mech_id, now)?;

        let key = match idempotency_key {
            Some(key) => key.to_string(),
            None => self.derived_key(mech_id, donor, cents, now)?,
        };

        if self.key_already_applied(mech_id, &key)? {
            tracing::info!(mech_id, %key, "Duplicate donation ignored");
            return Ok(compute_display_state(&snapshot, now));
        }

        self.settle_decay(&mut snapshot, now);

        let mut last_seq = self.append(
            mech_id,
            now,
            EventKind::DonationAdded {
                donation_id: Uuid::now_v7(),
                idempotency_key: key,
                units: cents,
                donor: donor.to_string(),
                channel_id: channel_id.map(str::to_string),
            },
        )?;

        let config = self.config.load(false)?;
        let mode = self.cost_policy.mode();
        let members = self.current_members(&snapshot);
        let outcome = apply_donation_units(&mut snapshot, cents, &config, mode, members, true);

        for level_up in &outcome.level_ups {
            last_seq = self.append(
                mech_id,
                now,
                EventKind::LevelUpCommitted {
                    from_level: level_up.from_level,
                    to_level: level_up.to_level,
                    old_goal_requirement: level_up.old_goal_requirement,
                    exact_hit: level_up.exact_hit,
                },
            )?;
            tracing::info!(
                mech_id,
                from = level_up.from_level,
                to = level_up.to_level,
                exact_hit = level_up.exact_hit,
                "Level up committed"
            );
        }
        if let Some(bonus) = &outcome.bonus {
            last_seq = self.append(
                mech_id,
                now,
                EventKind::ExactHitBonusGranted {
                    power_units: bonus.power_units,
                    from_level: bonus.from_level,
                    to_level: bonus.to_level,
                    reason: "evolution goal hit exactly".to_string(),
                },
            )?;
        }

        snapshot.version += 1;
        snapshot.last_event_seq = last_seq;
        self.snapshots.persist(&snapshot)?;
        Ok(compute_display_state(&snapshot, now))
    }

    /// Record a power-only system donation. Evolution and level are never
    /// touched. An amount rounding to zero cents is a safe no-op.
    pub fn add_system_donation(
        &self,
        mech_id: &str,
        amount: Decimal,
        event_name: &str,
        description: &str,
    ) -> Result<DisplayState> {
        let name = event_name.trim();
        if name.is_empty() || name.len() > MAX_EVENT_NAME_LEN {
            return Err(Error::InvalidInput(format!(
                "Event name must be 1..={} characters",
                MAX_EVENT_NAME_LEN
            )));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(Error::InvalidInput(format!(
                "Description must be at most {} characters",
                MAX_DESCRIPTION_LEN
            )));
        }
        if amount < Decimal::ZERO {
            return Err(Error::InvalidAmount("Amount must not be negative".to_string()));
        }
        let cents = dollars_to_cents(amount)
            .ok_or_else(|| Error::InvalidAmount(format!("Unrepresentable amount: {amount}")))?;
        if cents > MAX_SYSTEM_DONATION_CENTS {
            return Err(Error::InvalidAmount(format!(
                "Amount exceeds system donation ceiling of {} cents",
                MAX_SYSTEM_DONATION_CENTS
            )));
        }

        let _guard = self.lock.lock();
        let now = self.clock.now();
        let mut snapshot = self.load_or_init(mech_id, now)?;

        if cents == 0 {
            tracing::debug!(mech_id, %amount, "System donation rounds to zero cents, no-op");
            return Ok(compute_display_state(&snapshot, now));
        }

        self.settle_decay(&mut snapshot, now);

        let key = hex_digest(&[
            mech_id.as_bytes(),
            name.as_bytes(),
            &cents.to_be_bytes(),
            now.to_rfc3339().as_bytes(),
        ]);
        let seq = self.append(
            mech_id,
            now,
            EventKind::SystemDonationAdded {
                idempotency_key: key,
                power_units: cents,
                event_name: name.to_string(),
                description: description.to_string(),
            },
        )?;

        apply_system_power(&mut snapshot, cents);
        snapshot.version += 1;
        snapshot.last_event_seq = seq;
        self.snapshots.persist(&snapshot)?;
        Ok(compute_display_state(&snapshot, now))
    }

    /// Record an externally supplied member-count sample. Negative input is
    /// clamped to zero. Affects only future requirement calculations.
    pub fn update_member_count(&self, mech_id: &str, count: i64) -> Result<DisplayState> {
        let count = if count < 0 {
            tracing::warn!(mech_id, count, "Negative member count clamped to zero");
            0
        } else {
            count.min(domain::MAX_MEMBER_COUNT)
        };

        let _guard = self.lock.lock();
        let now = self.clock.now();
        let mut snapshot = self.load_or_init(mech_id, now)?;
        self.settle_decay(&mut snapshot, now);

        let seq = self.append(
            mech_id,
            now,
            EventKind::MemberCountUpdated {
                member_count: count,
            },
        )?;

        snapshot.last_user_count_sample = count;
        snapshot.version += 1;
        snapshot.last_event_seq = seq;
        self.snapshots.persist(&snapshot)?;
        Ok(compute_display_state(&snapshot, now))
    }

    /// Grant the deterministic power gift for a campaign, at most once per
    /// campaign and only while current (decayed) power is zero. Returns the
    /// granted amount in dollars, or `None` when the gift was refused.
    pub fn power_gift(
        &self,
        mech_id: &str,
        campaign_id: &str,
    ) -> Result<(DisplayState, Option<Decimal>)> {
        let _guard = self.lock.lock();
        let now = self.clock.now();
        let mut snapshot = self.load_or_init(mech_id, now)?;

        let current_power = decayed_power(
            snapshot.power_acc,
            elapsed_seconds(snapshot.goal_started_at, now),
            snapshot.power_decay_per_day,
        );
        if current_power > 0 {
            tracing::debug!(mech_id, campaign_id, current_power, "Power gift refused: power remains");
            return Ok((compute_display_state(&snapshot, now), None));
        }

        let already_granted = self.log.read_all()?.iter().any(|event| {
            event.mech_id == mech_id
                && matches!(
                    &event.kind,
                    EventKind::PowerGiftGranted { campaign_id: c, .. } if c.as_str() == campaign_id
                )
        });
        if already_granted {
            tracing::debug!(mech_id, campaign_id, "Power gift refused: campaign already granted");
            return Ok((compute_display_state(&snapshot, now), None));
        }

        self.settle_decay(&mut snapshot, now);

        let cents = deterministic_gift(mech_id, campaign_id);
        let seq = self.append(
            mech_id,
            now,
            EventKind::PowerGiftGranted {
                campaign_id: campaign_id.to_string(),
                power_units: cents,
            },
        )?;

        apply_gift_power(&mut snapshot, cents);
        snapshot.version += 1;
        snapshot.last_event_seq = seq;
        self.snapshots.persist(&snapshot)?;

        tracing::info!(mech_id, campaign_id, cents, "Power gift granted");
        Ok((compute_display_state(&snapshot, now), Some(Decimal::new(cents, 2))))
    }

    /// Logically delete a donation-like event by appending a tombstone, then
    /// rebuild the snapshot from the surviving history. Tombstoning a
    /// tombstone undeletes its target.
    pub fn delete_donation(&self, mech_id: &str, seq: u64, reason: &str) -> Result<DisplayState> {
        let _guard = self.lock.lock();

        let events: Vec<Event> = self
            .log
            .read_all()?
            .into_iter()
            .filter(|event| event.mech_id == mech_id)
            .collect();

        let target = events
            .iter()
            .find(|event| event.seq == seq)
            .ok_or(Error::EventNotFound(seq))?;
        if !target.kind.is_deletable() {
            return Err(Error::NotDeletable {
                seq,
                kind: target.kind.type_name(),
            });
        }
        if effective_deleted(&events).contains(&seq) {
            return Err(Error::AlreadyDeleted(seq));
        }

        let (donor, units) = match &target.kind {
            EventKind::DonationAdded { donor, units, .. } => (Some(donor.clone()), Some(*units)),
            EventKind::SystemDonationAdded { power_units, .. }
            | EventKind::PowerGiftGranted { power_units, .. }
            | EventKind::ExactHitBonusGranted { power_units, .. } => (None, Some(*power_units)),
            EventKind::DonationDeleted { donor, units, .. } => (donor.clone(), *units),
            _ => (None, None),
        };
        let original_type = target.kind.type_name().to_string();

        let now = self.clock.now();
        self.append(
            mech_id,
            now,
            EventKind::DonationDeleted {
                deleted_seq: seq,
                donor,
                units,
                reason: reason.to_string(),
                original_type,
            },
        )?;

        tracing::info!(mech_id, deleted_seq = seq, "Tombstone appended, rebuilding");
        let snapshot = self.rebuild_locked(mech_id)?;
        Ok(compute_display_state(&snapshot, self.clock.now()))
    }

    /// Rebuild the snapshot from the full event history: the authoritative
    /// recovery and consistency path.
    pub fn rebuild_from_events(&self, mech_id: &str) -> Result<DisplayState> {
        let _guard = self.lock.lock();
        let snapshot = self.rebuild_locked(mech_id)?;
        Ok(compute_display_state(&snapshot, self.clock.now()))
    }

    // Internal helpers (must be called with the lock held)

    fn load_or_init(&self, mech_id: &str, now: DateTime<Utc>) -> Result<Snapshot> {
        if let Some(snapshot) = self.snapshots.load(mech_id)? {
            return Ok(snapshot);
        }

        let has_history = self
            .log
            .read_all()?
            .iter()
            .any(|event| event.mech_id == mech_id);
        if has_history {
            // Missing or corrupt snapshot with surviving history: replay.
            return self.rebuild_locked(mech_id);
        }

        let config = self.config.load(false)?;
        let snapshot = new_snapshot(mech_id, &config, self.cost_policy.mode(), now);
        self.snapshots.persist(&snapshot)?;
        tracing::info!(mech_id, "Snapshot created lazily");
        Ok(snapshot)
    }

    fn rebuild_locked(&self, mech_id: &str) -> Result<Snapshot> {
        let mut events: Vec<Event> = self
            .log
            .read_all()?
            .into_iter()
            .filter(|event| event.mech_id == mech_id)
            .collect();

        let config = self.config.load(false)?;
        let mode = self.cost_policy.mode();

        if events.is_empty() {
            let snapshot = new_snapshot(mech_id, &config, mode, self.clock.now());
            self.snapshots.persist(&snapshot)?;
            return Ok(snapshot);
        }

        let deleted = effective_deleted(&events);
        let max_seq = events.iter().map(|e| e.seq).max().unwrap_or(0);

        // Events from independent producers may not append in timestamp
        // order; replay follows timestamps, with seq as the tie-breaker.
        events.sort_by_key(|event| (event.ts, event.seq));

        let first_ts = events[0].ts;
        let mut snapshot = new_snapshot(mech_id, &config, mode, first_ts);
        let mut members: Option<i64> = None;
        let mut prev_ts: Option<DateTime<Utc>> = None;
        let mut applied: u64 = 0;

        for event in &events {
            if matches!(event.kind, EventKind::DonationDeleted { .. }) {
                continue;
            }
            if deleted.contains(&event.seq) {
                continue;
            }

            if let Some(prev) = prev_ts {
                let elapsed = elapsed_seconds(prev, event.ts);
                snapshot.power_acc =
                    decayed_power(snapshot.power_acc, elapsed, snapshot.power_decay_per_day);
            }
            prev_ts = Some(event.ts);

            match &event.kind {
                EventKind::DonationAdded { units, .. } => {
                    apply_donation_units(&mut snapshot, *units, &config, mode, members, false);
                }
                EventKind::SystemDonationAdded { power_units, .. }
                | EventKind::ExactHitBonusGranted { power_units, .. } => {
                    apply_system_power(&mut snapshot, *power_units);
                }
                EventKind::PowerGiftGranted { power_units, .. } => {
                    apply_gift_power(&mut snapshot, *power_units);
                }
                EventKind::MemberCountUpdated { member_count } => {
                    snapshot.last_user_count_sample = *member_count;
                    members = Some(*member_count);
                }
                // Level-ups are re-derived from the donations themselves.
                EventKind::LevelUpCommitted { .. } | EventKind::DonationDeleted { .. } => {}
            }
            applied += 1;
        }

        snapshot.goal_started_at = prev_ts.unwrap_or(first_ts);
        snapshot.version = applied;
        snapshot.last_event_seq = max_seq;
        self.snapshots.persist(&snapshot)?;

        tracing::info!(mech_id, applied, level = snapshot.level, "Rebuilt from events");
        Ok(snapshot)
    }

    fn append(&self, mech_id: &str, ts: DateTime<Utc>, kind: EventKind) -> Result<u64> {
        let seq = self.log.next_seq()?;
        let event = Event {
            seq,
            ts,
            mech_id: mech_id.to_string(),
            kind,
        };
        self.log.append(&event)?;
        Ok(seq)
    }

    fn key_already_applied(&self, mech_id: &str, key: &str) -> Result<bool> {
        Ok(self.log.read_all()?.iter().any(|event| {
            event.mech_id == mech_id
                && match &event.kind {
                    EventKind::DonationAdded {
                        idempotency_key, ..
                    }
                    | EventKind::SystemDonationAdded {
                        idempotency_key, ..
                    } => idempotency_key.as_str() == key,
                    _ => false,
                }
        }))
    }

    fn derived_key(
        &self,
        mech_id: &str,
        donor: &str,
        cents: i64,
        now: DateTime<Utc>,
    ) -> Result<String> {
        // Bucketed to the local minute so immediate client retries dedupe.
        let tz = self.config.timezone()?;
        let minute = now.with_timezone(&tz).format("%Y-%m-%dT%H:%M").to_string();
        Ok(hex_digest(&[
            mech_id.as_bytes(),
            donor.as_bytes(),
            &cents.to_be_bytes(),
            minute.as_bytes(),
        ]))
    }

    fn current_members(&self, snapshot: &Snapshot) -> Option<i64> {
        self.members.latest().or_else(|| {
            if snapshot.last_user_count_sample > 0 {
                Some(snapshot.last_user_count_sample)
            } else {
                None
            }
        })
    }

    fn settle_decay(&self, snapshot: &mut Snapshot, now: DateTime<Utc>) {
        let elapsed = elapsed_seconds(snapshot.goal_started_at, now);
        if elapsed > 0 {
            snapshot.power_acc =
                decayed_power(snapshot.power_acc, elapsed, snapshot.power_decay_per_day);
        }
        snapshot.goal_started_at = now;
    }
}

/// Effective tombstone targets: an event is deleted iff some tombstone
/// targeting it is itself not deleted. Tombstones always carry a higher seq
/// than their target, so the recursion terminates.
fn effective_deleted(events: &[Event]) -> HashSet<u64> {
    let tombstones: HashMap<u64, u64> = events
        .iter()
        .filter_map(|event| match event.kind {
            EventKind::DonationDeleted { deleted_seq, .. } => Some((event.seq, deleted_seq)),
            _ => None,
        })
        .collect();

    let mut cancellers: HashMap<u64, Vec<u64>> = HashMap::new();
    for (&seq, &target) in &tombstones {
        cancellers.entry(target).or_default().push(seq);
    }

    fn is_effective(
        seq: u64,
        cancellers: &HashMap<u64, Vec<u64>>,
        memo: &mut HashMap<u64, bool>,
    ) -> bool {
        if let Some(&known) = memo.get(&seq) {
            return known;
        }
        let effective = cancellers
            .get(&seq)
            .map(|list| !list.iter().any(|&c| is_effective(c, cancellers, memo)))
            .unwrap_or(true);
        memo.insert(seq, effective);
        effective
    }

    let mut memo = HashMap::new();
    tombstones
        .iter()
        .filter(|(&seq, _)| is_effective(seq, &cancellers, &mut memo))
        .map(|(_, &target)| target)
        .collect()
}

fn dollars_to_cents(amount: Decimal) -> Option<i64> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round()
        .to_i64()
}

fn hex_digest(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
        hasher.update(b"\x1f");
    }
    let digest = hasher.finalize();

    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
