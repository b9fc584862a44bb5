//! Injected capabilities for the ledger service
//!
//! Behavior that the original system looked up through module-level state is
//! expressed here as constructor-injected strategies: a clock source, a
//! cost-mode policy, and a member-count provider. Tests substitute these
//! without touching shared global state.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;

/// Time source consulted for timestamps, decay, and derived idempotency keys.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Requirement-calculation mode, consulted on every cost computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostMode {
    /// Use the computed subtotal unmodified when true
    pub use_dynamic: bool,
    /// Multiplier applied to the subtotal in static-override mode
    pub difficulty_multiplier: f64,
}

impl Default for CostMode {
    fn default() -> Self {
        Self {
            use_dynamic: true,
            difficulty_multiplier: 1.0,
        }
    }
}

/// External policy selecting between dynamic and static-override costing.
pub trait CostPolicy: Send + Sync {
    /// Current cost mode.
    fn mode(&self) -> CostMode;
}

/// Always-dynamic costing (the default collaborator).
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicCost;

impl CostPolicy for DynamicCost {
    fn mode(&self) -> CostMode {
        CostMode::default()
    }
}

/// Fixed cost mode, for tests and static deployments.
#[derive(Debug, Clone, Copy)]
pub struct FixedCostMode(pub CostMode);

impl CostPolicy for FixedCostMode {
    fn mode(&self) -> CostMode {
        self.0
    }
}

/// Latest externally supplied population sample.
pub trait MemberCountSource: Send + Sync {
    /// Most recent member count, if one is available.
    fn latest(&self) -> Option<i64>;
}

/// Member count read from `member_count.json` (`{"count": n}`), written by an
/// external collaborator. Any read or parse failure yields `None`.
#[derive(Debug, Clone)]
pub struct FileMemberCount {
    path: PathBuf,
}

#[derive(Deserialize)]
struct MemberCountDoc {
    count: i64,
}

impl FileMemberCount {
    /// Read from the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MemberCountSource for FileMemberCount {
    fn latest(&self) -> Option<i64> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let doc: MemberCountDoc = serde_json::from_str(&content).ok()?;
        Some(doc.count.max(0))
    }
}

/// Fixed member count, for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticMemberCount(pub Option<i64>);

impl MemberCountSource for StaticMemberCount {
    fn latest(&self) -> Option<i64> {
        self.0
    }
}

/// Manually advanced clock, for deterministic decay in tests and tooling.
#[derive(Debug)]
pub struct ManualClock {
    now: parking_lot::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start the clock at the given instant.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock();
        *now += duration;
    }

    /// Jump the clock to an exact instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_member_count_reads_doc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("member_count.json");
        std::fs::write(&path, r#"{"count": 250}"#).unwrap();

        let source = FileMemberCount::new(&path);
        assert_eq!(source.latest(), Some(250));
    }

    #[test]
    fn test_file_member_count_clamps_negative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("member_count.json");
        std::fs::write(&path, r#"{"count": -5}"#).unwrap();

        let source = FileMemberCount::new(&path);
        assert_eq!(source.latest(), Some(0));
    }

    #[test]
    fn test_file_member_count_missing_or_bad_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("member_count.json");

        let source = FileMemberCount::new(&path);
        assert_eq!(source.latest(), None);

        std::fs::write(&path, "oops").unwrap();
        assert_eq!(source.latest(), None);
    }
}
