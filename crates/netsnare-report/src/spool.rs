//! Offline attack spool.
//!
//! A JSON file holding canonical records the client could not (or, in
//! offline mode, must not) transmit. Appended on failure, rewritten to the
//! remaining pending entries after each replay pass. Cleared at startup
//! unless the operator opts into retention.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use netsnare_classify::AttackRecord;

use crate::error::SpoolError;

/// One spooled record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolEntry {
    pub record: AttackRecord,
    pub stored_at: SystemTime,
    pub pending_upload: bool,
    /// True when the throttle suppressed this record; replay skips it.
    #[serde(default)]
    pub throttled: bool,
}

/// File-backed spool. All file access happens under one lock: the replay
/// task and the report sender both write here.
pub struct Spool {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Spool {
    /// Open the spool at `path`, creating parent directories.
    ///
    /// Unless `keep_existing`, any entries from a previous run are
    /// discarded so a long-idle honeypot does not replay stale attacks.
    pub fn open(path: &Path, keep_existing: bool) -> Result<Self, SpoolError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let spool = Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        };
        if !keep_existing {
            let previous = spool.entries()?.len();
            if previous > 0 {
                info!(previous, "clearing offline spool from previous run");
            }
            spool.write_entries(&[])?;
        } else if !path.exists() {
            spool.write_entries(&[])?;
        }
        Ok(spool)
    }

    /// Append a record as a pending entry.
    pub fn append(&self, record: &AttackRecord, throttled: bool) -> Result<(), SpoolError> {
        let _guard = self.lock.lock().expect("spool lock");
        let mut entries = self.read_entries()?;
        entries.push(SpoolEntry {
            record: record.clone(),
            stored_at: SystemTime::now(),
            // Throttled records are kept as evidence, never transmitted.
            pending_upload: !throttled,
            throttled,
        });
        self.write_entries_locked(&entries)?;
        debug!(total = entries.len(), "record spooled");
        Ok(())
    }

    /// All entries currently on disk.
    pub fn entries(&self) -> Result<Vec<SpoolEntry>, SpoolError> {
        let _guard = self.lock.lock().expect("spool lock");
        self.read_entries()
    }

    /// Pending, non-throttled entries eligible for replay.
    pub fn pending(&self) -> Result<Vec<SpoolEntry>, SpoolError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.pending_upload && !e.throttled)
            .collect())
    }

    /// Replace the file contents. Used after a replay pass to keep only
    /// what is still pending.
    pub fn write_entries(&self, entries: &[SpoolEntry]) -> Result<(), SpoolError> {
        let _guard = self.lock.lock().expect("spool lock");
        self.write_entries_locked(entries)
    }

    fn read_entries(&self) -> Result<Vec<SpoolEntry>, SpoolError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_entries_locked(&self, entries: &[SpoolEntry]) -> Result<(), SpoolError> {
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsnare_classify::classify;
    use snare_core::{ObservationEvent, Protocol};

    fn make_record(kind: &str) -> AttackRecord {
        classify(&ObservationEvent::new(
            "203.0.113.9".parse().unwrap(),
            4444,
            Protocol::Ssh,
            kind,
            "spool test",
            vec![],
        ))
    }

    fn temp_spool_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("logs").join("offline_attacks.json")
    }

    #[test]
    fn open_creates_parent_dirs_and_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::open(&temp_spool_path(&dir), false).unwrap();
        assert!(temp_spool_path(&dir).exists());
        assert!(spool.entries().unwrap().is_empty());
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::open(&temp_spool_path(&dir), false).unwrap();

        spool.append(&make_record("ssh_scan"), false).unwrap();
        spool.append(&make_record("sql_injection"), false).unwrap();

        let entries = spool.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.pending_upload));
    }

    #[test]
    fn startup_clears_previous_run_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_spool_path(&dir);
        {
            let spool = Spool::open(&path, false).unwrap();
            spool.append(&make_record("ssh_scan"), false).unwrap();
        }
        let spool = Spool::open(&path, false).unwrap();
        assert!(spool.entries().unwrap().is_empty());
    }

    #[test]
    fn keep_existing_retains_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_spool_path(&dir);
        {
            let spool = Spool::open(&path, false).unwrap();
            spool.append(&make_record("ssh_scan"), false).unwrap();
        }
        let spool = Spool::open(&path, true).unwrap();
        assert_eq!(spool.entries().unwrap().len(), 1);
    }

    #[test]
    fn throttled_entries_are_stored_but_not_pending() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::open(&temp_spool_path(&dir), false).unwrap();

        spool.append(&make_record("ssh_scan"), true).unwrap();
        spool.append(&make_record("sql_injection"), false).unwrap();

        assert_eq!(spool.entries().unwrap().len(), 2);
        let pending = spool.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert!(!pending[0].throttled);
    }

    #[test]
    fn rewrite_keeps_only_given_entries() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::open(&temp_spool_path(&dir), false).unwrap();
        spool.append(&make_record("ssh_scan"), false).unwrap();
        spool.append(&make_record("sql_injection"), false).unwrap();

        let remaining: Vec<SpoolEntry> = spool
            .entries()
            .unwrap()
            .into_iter()
            .skip(1)
            .collect();
        spool.write_entries(&remaining).unwrap();
        assert_eq!(spool.entries().unwrap().len(), 1);
    }

    #[test]
    fn spooled_kind_survives_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::open(&temp_spool_path(&dir), false).unwrap();
        let record = make_record("smtp_relay_attempt");
        spool.append(&record, false).unwrap();

        let back = spool.entries().unwrap();
        assert_eq!(back[0].record.attack_type, record.attack_type);
        assert_eq!(back[0].record.metadata.original_type, "smtp_relay_attempt");
    }
}
