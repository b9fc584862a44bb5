//! Pure domain engine
//!
//! Side-effect-free state transitions and projections:
//! - Difficulty bin lookup and requirement calculation
//! - Deterministic gift amounts (hash-derived, replay-safe)
//! - Donation application with multi-level cascades and exact-hit bonuses
//! - Continuous power decay and display-state projection
//!
//! All money is integer cents. Invalid inputs are corrected to safe defaults
//! with a logged warning rather than failing the calculation.

use crate::config::GameConfig;
use crate::policy::CostMode;
use crate::types::{
    DisplayState, DonationOutcome, ExactHitBonus, LevelUp, Snapshot, MAX_BIN, MAX_LEVEL,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Members that contribute no dynamic cost.
pub const FREE_MEMBERS: i64 = 10;

/// Dynamic cost per member beyond the free allowance, in cents.
pub const CENTS_PER_MEMBER: i64 = 5;

/// Lower bound for any non-terminal requirement, in cents.
pub const MIN_REQUIREMENT_CENTS: i64 = 100;

/// Upper bound for any requirement, in cents.
pub const MAX_REQUIREMENT_CENTS: i64 = 100_000_000;

/// Bonus granted for landing exactly on the threshold, in cents.
pub const EXACT_HIT_BONUS_CENTS: i64 = 100;

/// Ceiling for the power accumulator, in cents.
pub const POWER_ACC_CEILING: i64 = 1_000_000_000;

/// Ceiling for the lifetime donation total, in cents.
pub const CUMULATIVE_CEILING: i64 = 100_000_000_000;

/// Largest accepted member count.
pub const MAX_MEMBER_COUNT: i64 = 10_000_000;

/// Default mech variant for lazily created snapshots.
pub const DEFAULT_MECH_TYPE: &str = "standard";

const SECONDS_PER_DAY: i64 = 86_400;

/// Overflow-safe capped addition.
fn add_capped(current: i64, units: i64, ceiling: i64) -> i64 {
    current.saturating_add(units).min(ceiling)
}

/// Map a member count to a difficulty bin (1..=21).
///
/// Returns the highest bin whose ascending inclusive lower bound is at or
/// below the count. Negative counts are corrected to zero.
pub fn current_bin(member_count: i64, bins: &[i64]) -> u8 {
    let count = if member_count < 0 {
        tracing::warn!(member_count, "Negative member count, treating as zero");
        0
    } else {
        member_count
    };

    let mut bin = 1u8;
    for (idx, &lower) in bins.iter().take(usize::from(MAX_BIN)).enumerate() {
        if count >= lower {
            bin = (idx as u8) + 1;
        } else {
            break;
        }
    }
    bin
}

/// Total requirement in cents for reaching the next level.
///
/// `base_cost[level] + dynamic`, where dynamic is computed precisely from the
/// member count when one is available (first [`FREE_MEMBERS`] free, then
/// [`CENTS_PER_MEMBER`] each) and falls back to the per-bin table otherwise.
/// The static-override mode multiplies the subtotal by the configured
/// difficulty multiplier. All sub-results are clamped against
/// [`MIN_REQUIREMENT_CENTS`] and [`MAX_REQUIREMENT_CENTS`].
pub fn requirement_for_level_and_bin(
    config: &GameConfig,
    mode: CostMode,
    level: u8,
    bin: u8,
    member_count: Option<i64>,
) -> i64 {
    if level >= MAX_LEVEL {
        return 0;
    }
    let level = if level < 1 {
        tracing::warn!(level, "Level below range, using 1");
        1
    } else {
        level
    };
    let bin = if !(1..=MAX_BIN).contains(&bin) {
        tracing::warn!(bin, "Bin out of range, using 1");
        1
    } else {
        bin
    };
    let member_count = member_count.map(|m| {
        if !(0..=MAX_MEMBER_COUNT).contains(&m) {
            tracing::warn!(member_count = m, "Member count out of range, clamping");
            m.clamp(0, MAX_MEMBER_COUNT)
        } else {
            m
        }
    });

    let base = config.base_cost(level).clamp(0, MAX_REQUIREMENT_CENTS);
    let dynamic = member_count
        .map(|m| (m - FREE_MEMBERS).max(0).saturating_mul(CENTS_PER_MEMBER))
        .unwrap_or_else(|| config.bin_dynamic_cost(bin))
        .clamp(0, MAX_REQUIREMENT_CENTS);

    let subtotal = base
        .saturating_add(dynamic)
        .clamp(MIN_REQUIREMENT_CENTS, MAX_REQUIREMENT_CENTS);

    if mode.use_dynamic {
        subtotal
    } else {
        let multiplier = if mode.difficulty_multiplier.is_finite() && mode.difficulty_multiplier > 0.0
        {
            mode.difficulty_multiplier
        } else {
            tracing::warn!(
                multiplier = mode.difficulty_multiplier,
                "Invalid difficulty multiplier, using 1.0"
            );
            1.0
        };
        let scaled = (subtotal as f64 * multiplier).round();
        let scaled = if scaled.is_finite() { scaled as i64 } else { MAX_REQUIREMENT_CENTS };
        scaled.clamp(MIN_REQUIREMENT_CENTS, MAX_REQUIREMENT_CENTS)
    }
}

/// Reproducible gift amount in cents: one, two, or three dollars derived from
/// a one-way hash of the entity and campaign identifiers. Identical inputs
/// always produce the identical amount.
pub fn deterministic_gift(mech_id: &str, campaign_id: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(mech_id.as_bytes());
    hasher.update(b"|");
    hasher.update(campaign_id.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let h = u64::from_be_bytes(prefix);

    (1 + (h % 3) as i64) * 100
}

/// Power remaining after continuous decay over the given elapsed seconds.
pub fn decayed_power(power_cents: i64, elapsed_seconds: i64, rate_per_day: i64) -> i64 {
    if elapsed_seconds <= 0 || rate_per_day <= 0 {
        return power_cents.max(0);
    }
    let decay = (i128::from(elapsed_seconds) * i128::from(rate_per_day)
        / i128::from(SECONDS_PER_DAY)) as i64;
    (power_cents - decay).max(0)
}

/// Elapsed whole seconds between two instants, floored at zero.
pub fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().max(0)
}

/// Fresh level-1 snapshot with the goal computed for a zero-member bin.
pub fn new_snapshot(
    mech_id: &str,
    config: &GameConfig,
    mode: CostMode,
    now: DateTime<Utc>,
) -> Snapshot {
    let bin = current_bin(0, &config.difficulty_bins);
    Snapshot {
        mech_id: mech_id.to_string(),
        level: 1,
        evo_acc: 0,
        power_acc: 0,
        goal_requirement: requirement_for_level_and_bin(config, mode, 1, bin, Some(0)),
        difficulty_bin: bin,
        goal_started_at: now,
        power_decay_per_day: config.decay_per_day(DEFAULT_MECH_TYPE),
        version: 1,
        last_event_seq: 0,
        mech_type: DEFAULT_MECH_TYPE.to_string(),
        last_user_count_sample: 0,
        cumulative_donations_cents: 0,
    }
}

/// Apply donation units to a snapshot: the central state transition.
///
/// Adds to the cumulative total unconditionally; at the terminal level the
/// units feed power only. Otherwise both accumulators grow, and a single
/// large donation may cascade through several level-ups: each commit carries
/// the excess forward as the new evolution value and *replaces* the power
/// accumulator with that excess. An exact threshold hit ends the cascade
/// (excess is zero) and, when `grant_bonus` is set, adds
/// [`EXACT_HIT_BONUS_CENTS`] to power and the cumulative total. Replay passes
/// `grant_bonus = false` and applies logged bonus events instead, so deleting
/// a bonus event remains meaningful.
pub fn apply_donation_units(
    snapshot: &mut Snapshot,
    units_cents: i64,
    config: &GameConfig,
    mode: CostMode,
    member_count: Option<i64>,
    grant_bonus: bool,
) -> DonationOutcome {
    let mut outcome = DonationOutcome::default();

    snapshot.cumulative_donations_cents =
        add_capped(snapshot.cumulative_donations_cents, units_cents, CUMULATIVE_CEILING);

    if snapshot.level >= MAX_LEVEL {
        snapshot.power_acc = add_capped(snapshot.power_acc, units_cents, POWER_ACC_CEILING);
        return outcome;
    }

    snapshot.evo_acc = snapshot.evo_acc.saturating_add(units_cents);
    snapshot.power_acc = add_capped(snapshot.power_acc, units_cents, POWER_ACC_CEILING);

    while snapshot.evo_acc >= snapshot.goal_requirement && snapshot.level < MAX_LEVEL {
        let exact_hit = snapshot.evo_acc == snapshot.goal_requirement;
        let from_level = snapshot.level;
        let old_goal = snapshot.goal_requirement;

        snapshot.level += 1;
        let excess = snapshot.evo_acc - old_goal;
        snapshot.evo_acc = excess;
        // Power restarts at the carried excess; it is not additive across levels.
        snapshot.power_acc = excess.min(POWER_ACC_CEILING);

        outcome.level_ups.push(LevelUp {
            from_level,
            to_level: snapshot.level,
            old_goal_requirement: old_goal,
            exact_hit,
        });

        if exact_hit && grant_bonus {
            snapshot.power_acc =
                add_capped(snapshot.power_acc, EXACT_HIT_BONUS_CENTS, POWER_ACC_CEILING);
            snapshot.cumulative_donations_cents = add_capped(
                snapshot.cumulative_donations_cents,
                EXACT_HIT_BONUS_CENTS,
                CUMULATIVE_CEILING,
            );
            outcome.bonus = Some(ExactHitBonus {
                power_units: EXACT_HIT_BONUS_CENTS,
                from_level,
                to_level: snapshot.level,
            });
        }

        if snapshot.level >= MAX_LEVEL {
            snapshot.goal_requirement = 0;
            break;
        }

        let bin = current_bin(
            member_count.unwrap_or(snapshot.last_user_count_sample),
            &config.difficulty_bins,
        );
        snapshot.difficulty_bin = bin;
        snapshot.goal_requirement =
            requirement_for_level_and_bin(config, mode, snapshot.level, bin, member_count);
    }

    outcome
}

/// Apply power-only units that count toward the lifetime total (system
/// donations, exact-hit bonuses during replay). Evolution and level are
/// untouched.
pub fn apply_system_power(snapshot: &mut Snapshot, units_cents: i64) {
    snapshot.power_acc = add_capped(snapshot.power_acc, units_cents, POWER_ACC_CEILING);
    snapshot.cumulative_donations_cents =
        add_capped(snapshot.cumulative_donations_cents, units_cents, CUMULATIVE_CEILING);
}

/// Apply a power gift: power only, no cumulative contribution.
pub fn apply_gift_power(snapshot: &mut Snapshot, units_cents: i64) {
    snapshot.power_acc = add_capped(snapshot.power_acc, units_cents, POWER_ACC_CEILING);
}

/// Project a snapshot into caller-facing display units.
///
/// Decay is applied continuously for display based on elapsed wall-clock time
/// since `goal_started_at`; it is not persisted here. The power percentage is
/// clamped below 100 except at the terminal level.
pub fn compute_display_state(snapshot: &Snapshot, now: DateTime<Utc>) -> DisplayState {
    let elapsed = elapsed_seconds(snapshot.goal_started_at, now);
    let power = decayed_power(snapshot.power_acc, elapsed, snapshot.power_decay_per_day);
    let at_max_level = snapshot.level >= MAX_LEVEL;

    let evolution_percent = if snapshot.goal_requirement > 0 {
        (snapshot.evo_acc as f64 / snapshot.goal_requirement as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        100.0
    };
    let power_percent = if at_max_level {
        100.0
    } else if snapshot.goal_requirement > 0 {
        (power as f64 / snapshot.goal_requirement as f64 * 100.0).clamp(0.0, 99.9)
    } else {
        0.0
    };

    DisplayState {
        mech_id: snapshot.mech_id.clone(),
        level: snapshot.level,
        mech_type: snapshot.mech_type.clone(),
        evolution: Decimal::new(snapshot.evo_acc, 2),
        power: Decimal::new(power, 2),
        goal: Decimal::new(snapshot.goal_requirement, 2),
        cumulative_donations: Decimal::new(snapshot.cumulative_donations_cents, 2),
        evolution_percent,
        power_percent,
        at_max_level,
        member_count: snapshot.last_user_count_sample,
        version: snapshot.version,
    }
}
