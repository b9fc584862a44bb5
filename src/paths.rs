//! Storage root resolution and on-disk scaffolding
//!
//! Precedence for the root directory: `MECH_LEDGER_DIR` environment variable,
//! then an explicitly supplied override, then `./data/mech-ledger`.
//!
//! # Layout
//!
//! ```text
//! events.jsonl         append-only event log, one JSON object per line
//! snapshots/{id}.json  consolidated state per entity
//! config.json          cost tables, decay rates, timezone
//! last_seq.txt         last issued sequence number
//! member_count.json    externally written population signal (never created here)
//! ```

use crate::config::GameConfig;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Environment variable overriding the storage root.
pub const ROOT_ENV_VAR: &str = "MECH_LEDGER_DIR";

/// Default storage root when neither the environment nor the caller supplies one.
pub const DEFAULT_ROOT: &str = "./data/mech-ledger";

/// Resolved file locations under the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    root: PathBuf,
}

impl StorePaths {
    /// Resolve the storage root: env override, then caller override, then default.
    pub fn resolve(override_root: Option<&Path>) -> Self {
        let root = match std::env::var_os(ROOT_ENV_VAR) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => override_root
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT)),
        };
        Self { root }
    }

    /// Use an exact root, bypassing resolution (tests, embedded callers).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append-only event log.
    pub fn events_file(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    /// Last issued sequence number.
    pub fn seq_file(&self) -> PathBuf {
        self.root.join("last_seq.txt")
    }

    /// Per-entity snapshot directory.
    pub fn snapshot_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Game configuration.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Externally written member-count signal.
    pub fn member_count_file(&self) -> PathBuf {
        self.root.join("member_count.json")
    }

    /// Create any missing files and directories.
    ///
    /// The event log starts empty, the sequence counter at `0`, and the
    /// config file is seeded from `defaults` when absent. `member_count.json`
    /// is owned by an external collaborator and is not created.
    pub fn ensure(&self, defaults: &GameConfig) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.snapshot_dir())?;

        let events = self.events_file();
        if !events.exists() {
            std::fs::File::create(&events)?;
        }

        let seq = self.seq_file();
        if !seq.exists() {
            std::fs::write(&seq, "0")?;
        }

        let config = self.config_file();
        if !config.exists() {
            std::fs::write(&config, serde_json::to_string_pretty(defaults)?)?;
        }

        tracing::info!(root = %self.root.display(), "Storage root ready");
        Ok(())
    }
}
