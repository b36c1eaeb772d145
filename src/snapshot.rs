//! Content-addressed change detection over the gold dataset directory.
//!
//! Each CSV file is summarized as a [`DataSnapshot`] keyed by file name.
//! Change detection compares SHA-256 content hashes, so a rewritten file
//! with identical bytes counts as unchanged regardless of its mtime. The
//! persisted state is only ever committed by the caller after a fully
//! successful cycle; a crash mid-cycle re-detects the same changes on the
//! next run.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

use crate::error::{RecastError, Result};

/// Fingerprint of one dataset file at scan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    /// Full path of the scanned file.
    pub path: String,
    /// Lowercase hex SHA-256 of the file contents.
    pub content_hash: String,
    /// Modification time, seconds since the Unix epoch.
    pub mod_time: f64,
    pub size_bytes: u64,
}

/// Snapshot of every tracked dataset file, keyed by file name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataState {
    pub files: BTreeMap<String, DataSnapshot>,
}

impl DataState {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Outcome of comparing a fresh scan against the persisted state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub new: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
    /// Tracked files that disappeared from the directory.
    pub missing: BTreeSet<String>,
}

impl ChangeSet {
    /// File names that require a retrain, new first then modified.
    pub fn requiring_training(&self) -> Vec<String> {
        self.new.iter().chain(self.modified.iter()).cloned().collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.modified.is_empty()
    }
}

/// Hash one file in streaming chunks.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| RecastError::DataAccess(format!("cannot open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|e| RecastError::DataAccess(format!("cannot read {}: {e}", path.display())))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn snapshot_file(path: &Path) -> Result<DataSnapshot> {
    let meta = fs::metadata(path)
        .map_err(|e| RecastError::DataAccess(format!("cannot stat {}: {e}", path.display())))?;
    let mod_time = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(DataSnapshot {
        path: path.display().to_string(),
        content_hash: hash_file(path)?,
        mod_time,
        size_bytes: meta.len(),
    })
}

/// Scan a directory for `.csv` dataset files and fingerprint each one.
pub fn scan_dir(dir: &Path) -> Result<DataState> {
    let entries = fs::read_dir(dir)
        .map_err(|e| RecastError::DataAccess(format!("cannot read {}: {e}", dir.display())))?;

    let mut files = BTreeMap::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| RecastError::DataAccess(format!("cannot list {}: {e}", dir.display())))?;
        let path = entry.path();
        if !path.is_file() || path.extension().map_or(true, |ext| ext != "csv") {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        files.insert(name.to_string(), snapshot_file(&path)?);
    }
    debug!(dir = %dir.display(), files = files.len(), "scanned dataset directory");
    Ok(DataState { files })
}

/// Pure comparison of a fresh scan against the persisted state.
pub fn detect_changes(current: &DataState, prior: &DataState) -> ChangeSet {
    let mut changes = ChangeSet::default();
    for (name, snap) in &current.files {
        match prior.files.get(name) {
            None => {
                changes.new.insert(name.clone());
            }
            Some(prev) if prev.content_hash != snap.content_hash => {
                changes.modified.insert(name.clone());
            }
            Some(_) => {
                changes.unchanged.insert(name.clone());
            }
        }
    }
    for name in prior.files.keys() {
        if !current.files.contains_key(name) {
            changes.missing.insert(name.clone());
        }
    }
    changes
}

/// Persistence for the data state, with a lock file guarding concurrent
/// update-check invocations.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

/// Held for the duration of an update cycle; releases the lock file on drop.
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path.display(), error = %e, "failed to release state lock");
        }
    }
}

impl StateStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Load the persisted state; a missing file is an empty state, so the
    /// first cycle treats every dataset as new.
    pub fn load(&self) -> Result<DataState> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no prior data state; starting empty");
                Ok(DataState::default())
            }
            Err(e) => Err(RecastError::DataAccess(format!(
                "cannot read state file {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Acquire the cycle lock. Fails with `StateLocked` when another
    /// invocation holds it.
    pub fn lock(&self) -> Result<StateLock> {
        let lock_path = self.path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(mut f) => {
                let _ = writeln!(f, "{}", std::process::id());
                Ok(StateLock { lock_path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(
                RecastError::StateLocked(lock_path.display().to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the persisted state: write a temp file next to
    /// the target, fsync, then rename over it.
    pub fn commit(&self, state: &DataState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(state)?;
        let mut file = File::create(&tmp)?;
        file.write_all(raw.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), files = state.files.len(), "committed data state");
        Ok(())
    }
}
