//! Durable collection progress.
//!
//! `ProgressCheckpoint` records which work items are done, found no data, or
//! failed. `CheckpointStore` persists it atomically (temp file, fsync, rename)
//! so a crash mid-write leaves the previous checkpoint intact.
//! `CheckpointSession` is the single writer: it counts processed items,
//! flushes every `save_interval` items, and flushes unsaved progress when
//! dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FailureReason;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checkpoint {path} is inconsistent: an item is recorded in more than one state")]
    Inconsistent { path: PathBuf },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A failed work item and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reason: FailureReason,
    /// False once the item has been given up on.
    pub retryable: bool,
    pub attempts: u32,
}

/// Where a work item stands in the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStatus {
    NotSeen,
    Completed,
    NoData,
    RetryableFailed,
    PermanentFailed,
}

impl CheckpointStatus {
    /// Terminal states are skipped when a run resumes.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::NoData | Self::PermanentFailed)
    }
}

/// Snapshot of collection progress.
///
/// Every key lives in at most one of `completed_ids`, `no_data_ids` and
/// `failed_ids`; `pending_retry_ids` holds exactly the retryable keys of
/// `failed_ids`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressCheckpoint {
    completed_ids: BTreeSet<String>,
    no_data_ids: BTreeSet<String>,
    failed_ids: BTreeMap<String, FailureRecord>,
    pending_retry_ids: BTreeSet<String>,
    last_saved_at: Option<DateTime<Utc>>,
}

impl ProgressCheckpoint {
    pub fn status(&self, key: &str) -> CheckpointStatus {
        if self.completed_ids.contains(key) {
            CheckpointStatus::Completed
        } else if self.no_data_ids.contains(key) {
            CheckpointStatus::NoData
        } else if let Some(record) = self.failed_ids.get(key) {
            if record.retryable {
                CheckpointStatus::RetryableFailed
            } else {
                CheckpointStatus::PermanentFailed
            }
        } else {
            CheckpointStatus::NotSeen
        }
    }

    pub fn completed_ids(&self) -> &BTreeSet<String> {
        &self.completed_ids
    }

    pub fn no_data_ids(&self) -> &BTreeSet<String> {
        &self.no_data_ids
    }

    pub fn failed_ids(&self) -> &BTreeMap<String, FailureRecord> {
        &self.failed_ids
    }

    pub fn pending_retry_ids(&self) -> &BTreeSet<String> {
        &self.pending_retry_ids
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    /// Failed items that will not be retried, with their records.
    pub fn permanent_failures(&self) -> impl Iterator<Item = (&String, &FailureRecord)> {
        self.failed_ids.iter().filter(|(_, r)| !r.retryable)
    }

    pub fn mark_completed(&mut self, key: &str) {
        self.clear(key);
        self.completed_ids.insert(key.to_string());
    }

    pub fn mark_no_data(&mut self, key: &str) {
        self.clear(key);
        self.no_data_ids.insert(key.to_string());
    }

    /// Record a failure, counting the attempt.
    pub fn mark_failed(&mut self, key: &str, reason: FailureReason, retryable: bool) {
        let attempts = self.failed_ids.get(key).map_or(0, |r| r.attempts) + 1;
        self.clear(key);
        self.failed_ids.insert(
            key.to_string(),
            FailureRecord {
                reason,
                retryable,
                attempts,
            },
        );
        if retryable {
            self.pending_retry_ids.insert(key.to_string());
        }
    }

    /// Give up on a retryable failure. Returns false if `key` was not pending.
    pub fn mark_permanent(&mut self, key: &str) -> bool {
        if !self.pending_retry_ids.remove(key) {
            return false;
        }
        if let Some(record) = self.failed_ids.get_mut(key) {
            record.retryable = false;
        }
        true
    }

    /// Check the disjointness invariants.
    pub fn is_consistent(&self) -> bool {
        let disjoint = self.completed_ids.is_disjoint(&self.no_data_ids)
            && self
                .failed_ids
                .keys()
                .all(|k| !self.completed_ids.contains(k) && !self.no_data_ids.contains(k));
        let pending_matches = self.pending_retry_ids.iter().all(|k| {
            self.failed_ids.get(k).is_some_and(|r| r.retryable)
        }) && self
            .failed_ids
            .iter()
            .filter(|(_, r)| r.retryable)
            .all(|(k, _)| self.pending_retry_ids.contains(k));
        disjoint && pending_matches
    }

    fn clear(&mut self, key: &str) {
        self.completed_ids.remove(key);
        self.no_data_ids.remove(key);
        self.failed_ids.remove(key);
        self.pending_retry_ids.remove(key);
    }
}

/// JSON file holding a `ProgressCheckpoint`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn inconsistent(&self) -> CheckpointError {
        CheckpointError::Inconsistent {
            path: self.path.clone(),
        }
    }

    /// Read the checkpoint, or an empty one if the file does not exist.
    ///
    /// A file that records one item in several states is rejected.
    pub fn load(&self) -> Result<ProgressCheckpoint, CheckpointError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ProgressCheckpoint::default())
            }
            Err(e) => return Err(io_err(&self.path)(e)),
        };
        let checkpoint: ProgressCheckpoint = serde_json::from_str(&text)?;
        if !checkpoint.is_consistent() {
            return Err(self.inconsistent());
        }
        Ok(checkpoint)
    }

    /// Stamp `last_saved_at` and atomically replace the checkpoint file.
    /// Inconsistent state is never written.
    pub fn save(&self, checkpoint: &mut ProgressCheckpoint) -> Result<(), CheckpointError> {
        if !checkpoint.is_consistent() {
            return Err(self.inconsistent());
        }
        checkpoint.last_saved_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(checkpoint)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&json).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        Ok(())
    }
}

/// Exclusive, interval-flushing owner of the checkpoint for one run.
pub struct CheckpointSession {
    store: CheckpointStore,
    state: ProgressCheckpoint,
    save_interval: usize,
    since_save: usize,
    dirty: bool,
}

impl CheckpointSession {
    /// Load existing progress from `store`.
    pub fn open(store: CheckpointStore, save_interval: usize) -> Result<Self, CheckpointError> {
        let state = store.load()?;
        Ok(Self {
            store,
            state,
            save_interval: save_interval.max(1),
            since_save: 0,
            dirty: false,
        })
    }

    pub fn state(&self) -> &ProgressCheckpoint {
        &self.state
    }

    pub fn status(&self, key: &str) -> CheckpointStatus {
        self.state.status(key)
    }

    pub fn mark_completed(&mut self, key: &str) {
        self.state.mark_completed(key);
        self.dirty = true;
    }

    pub fn mark_no_data(&mut self, key: &str) {
        self.state.mark_no_data(key);
        self.dirty = true;
    }

    pub fn mark_failed(&mut self, key: &str, reason: FailureReason, retryable: bool) {
        self.state.mark_failed(key, reason, retryable);
        self.dirty = true;
    }

    pub fn mark_permanent(&mut self, key: &str) -> bool {
        let changed = self.state.mark_permanent(key);
        self.dirty |= changed;
        changed
    }

    /// Count one processed item, saving when the interval is reached.
    /// Returns true if a save happened.
    pub fn item_processed(&mut self) -> Result<bool, CheckpointError> {
        self.since_save += 1;
        if self.since_save >= self.save_interval {
            self.flush()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Persist the current state unconditionally.
    pub fn flush(&mut self) -> Result<(), CheckpointError> {
        self.store.save(&mut self.state)?;
        self.since_save = 0;
        self.dirty = false;
        tracing::debug!(path = %self.store.path().display(), "checkpoint saved");
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

impl Drop for CheckpointSession {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::error!("failed to flush checkpoint on shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    fn reason() -> FailureReason {
        FailureReason {
            kind: FailureKind::RateLimitExceeded,
            message: "429".to_string(),
        }
    }

    #[test]
    fn transitions_keep_sets_disjoint() {
        let mut cp = ProgressCheckpoint::default();
        cp.mark_failed("C00000001:2024", reason(), true);
        assert_eq!(cp.status("C00000001:2024"), CheckpointStatus::RetryableFailed);
        assert!(cp.pending_retry_ids().contains("C00000001:2024"));

        cp.mark_completed("C00000001:2024");
        assert_eq!(cp.status("C00000001:2024"), CheckpointStatus::Completed);
        assert!(cp.failed_ids().is_empty());
        assert!(cp.pending_retry_ids().is_empty());
        assert!(cp.is_consistent());
    }

    #[test]
    fn attempts_accumulate_and_permanent_leaves_pending() {
        let mut cp = ProgressCheckpoint::default();
        cp.mark_failed("k", reason(), true);
        cp.mark_failed("k", reason(), true);
        assert_eq!(cp.failed_ids()["k"].attempts, 2);

        assert!(cp.mark_permanent("k"));
        assert_eq!(cp.status("k"), CheckpointStatus::PermanentFailed);
        assert!(cp.pending_retry_ids().is_empty());
        assert_eq!(cp.permanent_failures().count(), 1);
        assert!(!cp.mark_permanent("k"));
        assert!(cp.is_consistent());
    }

    #[test]
    fn no_data_is_distinct_from_completed() {
        let mut cp = ProgressCheckpoint::default();
        cp.mark_no_data("k");
        assert_eq!(cp.status("k"), CheckpointStatus::NoData);
        assert!(cp.completed_ids().is_empty());
        assert!(cp.status("k").is_terminal());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));
        assert_eq!(store.load().unwrap(), ProgressCheckpoint::default());
    }

    #[test]
    fn save_then_load_round_trips_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested/progress.json"));
        let mut cp = ProgressCheckpoint::default();
        cp.mark_completed("a");
        cp.mark_failed("b", reason(), true);

        store.save(&mut cp).unwrap();
        assert!(cp.last_saved_at().is_some());
        assert!(!store.temp_path().exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded, cp);
    }

    #[test]
    fn stale_temp_file_does_not_affect_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));
        let mut cp = ProgressCheckpoint::default();
        cp.mark_completed("a");
        store.save(&mut cp).unwrap();

        // A torn write from a crashed process only ever touches the temp file
        fs::write(store.temp_path(), b"{\"completed_ids\": [").unwrap();
        assert!(store.load().unwrap().completed_ids().contains("a"));
    }

    const OVERLAPPING: &str = r#"{
        "completed_ids": ["C00000001:2024"],
        "failed_ids": {
            "C00000001:2024": {
                "reason": {"kind": {"kind": "network_failure"}, "message": "x"},
                "retryable": true,
                "attempts": 1
            }
        },
        "pending_retry_ids": ["C00000001:2024"]
    }"#;

    #[test]
    fn overlapping_states_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(&path, OVERLAPPING).unwrap();

        let store = CheckpointStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(CheckpointError::Inconsistent { .. })
        ));
        assert!(matches!(
            CheckpointSession::open(CheckpointStore::new(&path), 1),
            Err(CheckpointError::Inconsistent { .. })
        ));
    }

    #[test]
    fn retryable_record_missing_from_pending_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(
            &path,
            r#"{"failed_ids": {"C00000002:2024": {
                "reason": {"kind": {"kind": "parse_failed"}, "message": "x"},
                "retryable": true, "attempts": 2}}}"#,
        )
        .unwrap();
        assert!(matches!(
            CheckpointStore::new(&path).load(),
            Err(CheckpointError::Inconsistent { .. })
        ));
    }

    #[test]
    fn inconsistent_state_is_never_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let mut cp: ProgressCheckpoint = serde_json::from_str(OVERLAPPING).unwrap();

        let store = CheckpointStore::new(&path);
        assert!(matches!(
            store.save(&mut cp),
            Err(CheckpointError::Inconsistent { .. })
        ));
        assert!(!path.exists());
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn session_saves_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let mut session = CheckpointSession::open(CheckpointStore::new(&path), 2).unwrap();

        session.mark_completed("a");
        assert!(!session.item_processed().unwrap());
        assert!(!path.exists());

        session.mark_completed("b");
        assert!(session.item_processed().unwrap());
        assert_eq!(CheckpointStore::new(&path).load().unwrap().completed_ids().len(), 2);
        assert!(!session.is_dirty());
    }

    #[test]
    fn session_flushes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        {
            let mut session = CheckpointSession::open(CheckpointStore::new(&path), 100).unwrap();
            session.mark_no_data("a");
            session.item_processed().unwrap();
        }
        let loaded = CheckpointStore::new(&path).load().unwrap();
        assert!(loaded.no_data_ids().contains("a"));
    }

    #[test]
    fn session_resumes_existing_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let mut cp = ProgressCheckpoint::default();
        cp.mark_completed("done");
        CheckpointStore::new(&path).save(&mut cp).unwrap();

        let session = CheckpointSession::open(CheckpointStore::new(&path), 5).unwrap();
        assert_eq!(session.status("done"), CheckpointStatus::Completed);
        assert_eq!(session.status("other"), CheckpointStatus::NotSeen);
    }
}
