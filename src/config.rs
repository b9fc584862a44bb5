//! Configuration for the ledger
//!
//! The on-disk `config.json` carries the cost tables, decay rates, difficulty
//! thresholds, and timezone. Loading is cached; corrupt JSON is treated as
//! recoverable and silently replaced with the supplied defaults.

use crate::error::Result;
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Hard default decay rate when no table entry matches, in cents per day.
pub const DEFAULT_DECAY_CENTS_PER_DAY: i64 = 100;

/// Game configuration (cost tables, decay rates, thresholds, timezone)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// IANA timezone name used for local-time bucketing
    pub timezone: String,

    /// Ascending inclusive lower bounds for the 21 difficulty bins
    pub difficulty_bins: Vec<i64>,

    /// Base cost per level in cents, keyed by level ("1".."10")
    pub level_base_costs: BTreeMap<String, i64>,

    /// Fallback dynamic cost per bin in cents, keyed by bin ("1".."21")
    pub bin_to_dynamic_cost: BTreeMap<String, i64>,

    /// Power decay per day in cents, keyed by mech type ("default" fallback)
    pub mech_power_decay_per_day: BTreeMap<String, i64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        let difficulty_bins = vec![
            0, 25, 50, 100, 200, 300, 500, 750, 1_000, 1_500, 2_000, 3_000, 5_000, 7_500, 10_000,
            15_000, 20_000, 30_000, 50_000, 75_000, 100_000,
        ];

        let base_costs = [
            1_000, 2_500, 5_000, 10_000, 17_500, 27_500, 40_000, 55_000, 72_500, 92_500,
        ];
        let level_base_costs = base_costs
            .iter()
            .enumerate()
            .map(|(i, &cents)| ((i + 1).to_string(), cents))
            .collect();

        let bin_to_dynamic_cost = (1..=21u32)
            .map(|bin| (bin.to_string(), i64::from(bin - 1) * 500))
            .collect();

        let mut mech_power_decay_per_day = BTreeMap::new();
        mech_power_decay_per_day.insert("default".to_string(), DEFAULT_DECAY_CENTS_PER_DAY);

        Self {
            timezone: "UTC".to_string(),
            difficulty_bins,
            level_base_costs,
            bin_to_dynamic_cost,
            mech_power_decay_per_day,
        }
    }
}

impl GameConfig {
    /// Base cost in cents for the given level, falling back to the default
    /// table entry when the config omits it.
    pub fn base_cost(&self, level: u8) -> i64 {
        self.level_base_costs
            .get(&level.to_string())
            .copied()
            .unwrap_or_else(|| {
                GameConfig::default()
                    .level_base_costs
                    .get(&level.to_string())
                    .copied()
                    .unwrap_or(0)
            })
    }

    /// Fallback dynamic cost in cents for the given bin.
    pub fn bin_dynamic_cost(&self, bin: u8) -> i64 {
        self.bin_to_dynamic_cost
            .get(&bin.to_string())
            .copied()
            .unwrap_or(0)
    }

    /// Decay rate in cents per day for the given mech type.
    pub fn decay_per_day(&self, mech_type: &str) -> i64 {
        self.mech_power_decay_per_day
            .get(mech_type)
            .or_else(|| self.mech_power_decay_per_day.get("default"))
            .copied()
            .unwrap_or(DEFAULT_DECAY_CENTS_PER_DAY)
    }
}

/// Cached loader for `config.json`.
///
/// The first load parses the file; later loads return the cached value unless
/// `refresh` is set. A file that fails to parse is rewritten with the
/// defaults and never surfaces an error to the caller.
#[derive(Debug)]
pub struct ConfigCache {
    path: PathBuf,
    defaults: GameConfig,
    cached: Mutex<Option<GameConfig>>,
}

impl ConfigCache {
    /// Create a cache over the given config file, seeded with defaults.
    pub fn new(path: impl Into<PathBuf>, defaults: GameConfig) -> Self {
        Self {
            path: path.into(),
            defaults,
            cached: Mutex::new(None),
        }
    }

    /// Load the configuration, reading from disk on first access or when
    /// `refresh` is set.
    pub fn load(&self, refresh: bool) -> Result<GameConfig> {
        let mut cached = self.cached.lock();
        if !refresh {
            if let Some(config) = cached.as_ref() {
                return Ok(config.clone());
            }
        }

        let config = self.read_or_heal()?;
        *cached = Some(config.clone());
        Ok(config)
    }

    /// Drop the cached value; the next load re-reads the file.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    /// Resolve the configured timezone, falling back to UTC when the name
    /// cannot be parsed.
    pub fn timezone(&self) -> Result<Tz> {
        let config = self.load(false)?;
        Ok(config.timezone.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(
                timezone = %config.timezone,
                "Unknown timezone in config, falling back to UTC"
            );
            Tz::UTC
        }))
    }

    /// Write the given config to disk and refresh the cache.
    pub fn store(&self, config: &GameConfig) -> Result<()> {
        write_config(&self.path, config)?;
        *self.cached.lock() = Some(config.clone());
        Ok(())
    }

    fn read_or_heal(&self) -> Result<GameConfig> {
        if !self.path.exists() {
            write_config(&self.path, &self.defaults)?;
            return Ok(self.defaults.clone());
        }

        let content = std::fs::read_to_string(&self.path)?;
        match serde_json::from_str::<GameConfig>(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Corrupt config file, resetting to defaults"
                );
                write_config(&self.path, &self.defaults)?;
                Ok(self.defaults.clone())
            }
        }
    }
}

fn write_config(path: &Path, config: &GameConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_tables() {
        let config = GameConfig::default();
        assert_eq!(config.difficulty_bins.len(), 21);
        assert_eq!(config.base_cost(1), 1_000);
        assert_eq!(config.bin_dynamic_cost(1), 0);
        assert_eq!(config.decay_per_day("unknown"), DEFAULT_DECAY_CENTS_PER_DAY);
    }

    #[test]
    fn test_cache_seeds_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cache = ConfigCache::new(&path, GameConfig::default());

        let config = cache.load(false).unwrap();
        assert_eq!(config, GameConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_corrupt_config_resets_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        let cache = ConfigCache::new(&path, GameConfig::default());
        let config = cache.load(false).unwrap();
        assert_eq!(config, GameConfig::default());

        // The file was rewritten with valid JSON
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<GameConfig>(&content).is_ok());
    }

    #[test]
    fn test_refresh_rereads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cache = ConfigCache::new(&path, GameConfig::default());
        cache.load(false).unwrap();

        let mut edited = GameConfig::default();
        edited.level_base_costs.insert("1".to_string(), 7_777);
        std::fs::write(&path, serde_json::to_string(&edited).unwrap()).unwrap();

        // Cached value still served without refresh
        assert_eq!(cache.load(false).unwrap().base_cost(1), 1_000);
        assert_eq!(cache.load(true).unwrap().base_cost(1), 7_777);
    }

    #[test]
    fn test_timezone_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut defaults = GameConfig::default();
        defaults.timezone = "Not/AZone".to_string();
        let cache = ConfigCache::new(&path, defaults);

        assert_eq!(cache.timezone().unwrap(), Tz::UTC);
    }
}
