//! Storage layer: append-only event log and atomic snapshot store
//!
//! # Files
//!
//! - `events.jsonl` - append-only log, one JSON event per line, fsynced on append
//! - `last_seq.txt` - last issued sequence number
//! - `snapshots/{id}.json` - consolidated state, written via tmp-file + rename
//!
//! Sequence issuance and the subsequent append must both happen inside the
//! service's critical section; this module does no locking of its own.

use crate::error::{Error, Result};
use crate::paths::StorePaths;
use crate::types::{Event, Snapshot};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// Append-only event log with a persistent sequence counter.
#[derive(Debug)]
pub struct EventLog {
    events_path: PathBuf,
    seq_path: PathBuf,
}

impl EventLog {
    /// Open the log at the resolved paths. Files must already exist
    /// (see [`StorePaths::ensure`]).
    pub fn open(paths: &StorePaths) -> Self {
        Self {
            events_path: paths.events_file(),
            seq_path: paths.seq_file(),
        }
    }

    /// Issue the next sequence number, persisting the counter before returning.
    ///
    /// An unreadable counter file is re-derived from the maximum `seq` in the
    /// log rather than failing.
    pub fn next_seq(&self) -> Result<u64> {
        let current = match std::fs::read_to_string(&self.seq_path) {
            Ok(content) => match content.trim().parse::<u64>() {
                Ok(value) => value,
                Err(_) => {
                    tracing::warn!(
                        path = %self.seq_path.display(),
                        "Corrupt sequence counter, re-deriving from log"
                    );
                    self.max_seq_in_log()?
                }
            },
            Err(_) => self.max_seq_in_log()?,
        };

        let next = current
            .checked_add(1)
            .ok_or_else(|| Error::Storage("Sequence counter overflow".to_string()))?;
        std::fs::write(&self.seq_path, next.to_string())?;
        Ok(next)
    }

    /// Serialize the event as one line and append it, flushing to durable storage.
    pub fn append(&self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event)?;

        let mut file = OpenOptions::new().append(true).open(&self.events_path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        tracing::debug!(seq = event.seq, kind = event.kind.type_name(), "Event appended");
        Ok(())
    }

    /// Read the full log in file order, tolerating blank lines.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        let file = File::open(&self.events_path)?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)?;
            events.push(event);
        }
        Ok(events)
    }

    fn max_seq_in_log(&self) -> Result<u64> {
        Ok(self.read_all()?.iter().map(|e| e.seq).max().unwrap_or(0))
    }
}

/// Snapshot store with atomic writes.
///
/// The temporary file lives in the snapshot directory itself so the final
/// rename never crosses a filesystem boundary. A crash mid-write leaves the
/// prior snapshot untouched.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open the store at the resolved snapshot directory.
    pub fn open(paths: &StorePaths) -> Self {
        Self {
            dir: paths.snapshot_dir(),
        }
    }

    fn snapshot_path(&self, mech_id: &str) -> PathBuf {
        self.dir.join(format!("{mech_id}.json"))
    }

    /// Persist a snapshot: write to a temp file, fsync, atomically rename.
    pub fn persist(&self, snapshot: &Snapshot) -> Result<()> {
        let target = self.snapshot_path(&snapshot.mech_id);
        let tmp = self.dir.join(format!("{}.json.tmp", snapshot.mech_id));

        let content = serde_json::to_string(snapshot)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }

    /// Load a snapshot.
    ///
    /// Returns `Ok(None)` when the file is missing, and also when it is
    /// corrupt: the corrupt file is deleted and the caller is expected to
    /// rebuild from the event log.
    pub fn load(&self, mech_id: &str) -> Result<Option<Snapshot>> {
        let path = self.snapshot_path(mech_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<Snapshot>(&content) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                tracing::warn!(
                    mech_id,
                    error = %err,
                    "Corrupt snapshot, deleting for rebuild from events"
                );
                std::fs::remove_file(&path)?;
                Ok(None)
            }
        }
    }

    /// Raw snapshot bytes as persisted, for determinism checks.
    pub fn raw(&self, mech_id: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.snapshot_path(mech_id))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::types::EventKind;
    use chrono::Utc;

    fn test_paths() -> (StorePaths, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::at(dir.path());
        paths.ensure(&GameConfig::default()).unwrap();
        (paths, dir)
    }

    fn sample_event(seq: u64) -> Event {
        Event {
            seq,
            ts: Utc::now(),
            mech_id: "mech-1".to_string(),
            kind: EventKind::MemberCountUpdated { member_count: 42 },
        }
    }

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            mech_id: "mech-1".to_string(),
            level: 1,
            evo_acc: 0,
            power_acc: 0,
            goal_requirement: 1_000,
            difficulty_bin: 1,
            goal_started_at: Utc::now(),
            power_decay_per_day: 100,
            version: 1,
            last_event_seq: 0,
            mech_type: "standard".to_string(),
            last_user_count_sample: 0,
            cumulative_donations_cents: 0,
        }
    }

    #[test]
    fn test_sequence_is_gapless() {
        let (paths, _dir) = test_paths();
        let log = EventLog::open(&paths);

        assert_eq!(log.next_seq().unwrap(), 1);
        assert_eq!(log.next_seq().unwrap(), 2);
        assert_eq!(log.next_seq().unwrap(), 3);
    }

    #[test]
    fn test_corrupt_counter_rederived_from_log() {
        let (paths, _dir) = test_paths();
        let log = EventLog::open(&paths);

        log.append(&sample_event(1)).unwrap();
        log.append(&sample_event(2)).unwrap();
        std::fs::write(paths.seq_file(), "garbage").unwrap();

        assert_eq!(log.next_seq().unwrap(), 3);
    }

    #[test]
    fn test_append_and_read_preserves_order() {
        let (paths, _dir) = test_paths();
        let log = EventLog::open(&paths);

        for seq in 1..=5 {
            log.append(&sample_event(seq)).unwrap();
        }

        let events = log.read_all().unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_read_tolerates_blank_lines() {
        let (paths, _dir) = test_paths();
        let log = EventLog::open(&paths);

        log.append(&sample_event(1)).unwrap();
        {
            let mut file = OpenOptions::new()
                .append(true)
                .open(paths.events_file())
                .unwrap();
            file.write_all(b"\n\n").unwrap();
        }
        log.append(&sample_event(2)).unwrap();

        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let (paths, _dir) = test_paths();
        let store = SnapshotStore::open(&paths);

        let snapshot = sample_snapshot();
        store.persist(&snapshot).unwrap();

        let loaded = store.load("mech-1").unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_missing_snapshot_is_none() {
        let (paths, _dir) = test_paths();
        let store = SnapshotStore::open(&paths);
        assert!(store.load("nobody").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_snapshot_deleted_and_none() {
        let (paths, _dir) = test_paths();
        let store = SnapshotStore::open(&paths);

        let path = paths.snapshot_dir().join("mech-1.json");
        std::fs::write(&path, "{broken").unwrap();

        assert!(store.load("mech-1").unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_persist_leaves_no_tmp_file() {
        let (paths, _dir) = test_paths();
        let store = SnapshotStore::open(&paths);
        store.persist(&sample_snapshot()).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(paths.snapshot_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
