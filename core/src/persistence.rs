//! Durable snapshots of the attendee directory and the scan ledger.
//!
//! The core only needs "load the last snapshot" and "commit a full new
//! snapshot"; [`SnapshotStore`] is that seam. Two backends ship here:
//!
//! - **`JsonFileStore`**: one pretty-printed JSON file per table, replaced
//!   atomically (write `.tmp`, fsync, rename).
//! - **`MemoryStore`**: process-local, with failure injection for tests.
//!
//! ## File Layout
//!
//! ```text
//! ~/.local/share/checkin/
//!   attendees.json   [AttendeeRecord]
//!   scans.json       [ScanEvent]
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::attendee::AttendeeRecord;
use crate::ledger::ScanEvent;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Storage backend for the two logical tables.
///
/// `commit_*` must be durable when it returns `Ok`: a crash right after
/// must not lose the committed snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Last committed attendee snapshot (empty if none was ever committed).
    async fn load_attendees(&self) -> Result<Vec<AttendeeRecord>, PersistenceError>;

    /// Replace the attendee snapshot.
    async fn commit_attendees(&self, records: &[AttendeeRecord]) -> Result<(), PersistenceError>;

    /// Last committed ledger snapshot, in append order.
    async fn load_scans(&self) -> Result<Vec<ScanEvent>, PersistenceError>;

    /// Replace the ledger snapshot.
    async fn commit_scans(&self, events: &[ScanEvent]) -> Result<(), PersistenceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// JSON files
// ─────────────────────────────────────────────────────────────────────────────

const ATTENDEES_FILE: &str = "attendees.json";
const SCANS_FILE: &str = "scans.json";

/// File-backed store: `attendees.json` and `scans.json` under one directory.
pub struct JsonFileStore {
    base_dir: PathBuf,
}

impl JsonFileStore {
    /// Create a store at the XDG data directory (`~/.local/share/checkin/`).
    pub fn new() -> Result<Self, PersistenceError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| {
                PersistenceError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "could not determine XDG_DATA_HOME",
                ))
            })?
            .join("checkin");
        Self::with_base_dir(data_dir)
    }

    /// Create a store with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn read_table<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Vec<T>, PersistenceError> {
        let path = self.base_dir.join(name);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&data)?)
    }

    fn write_table<T: serde::Serialize>(
        &self,
        name: &str,
        rows: &[T],
    ) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(rows)?;
        atomic_write(&self.base_dir.join(name), &json)
    }
}

/// Atomically replace `path` with `data` via a synced `.tmp` sibling.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent()
        && let Ok(dir) = std::fs::File::open(parent)
    {
        // Directory fsync is not supported everywhere; the rename is already done.
        let _ = dir.sync_all();
    }
    Ok(())
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load_attendees(&self) -> Result<Vec<AttendeeRecord>, PersistenceError> {
        self.read_table(ATTENDEES_FILE)
    }

    async fn commit_attendees(&self, records: &[AttendeeRecord]) -> Result<(), PersistenceError> {
        self.write_table(ATTENDEES_FILE, records)
    }

    async fn load_scans(&self) -> Result<Vec<ScanEvent>, PersistenceError> {
        self.read_table(SCANS_FILE)
    }

    async fn commit_scans(&self, events: &[ScanEvent]) -> Result<(), PersistenceError> {
        self.write_table(SCANS_FILE, events)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    attendees: Mutex<Vec<AttendeeRecord>>,
    scans: Mutex<Vec<ScanEvent>>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail with `Unavailable` (or succeed again).
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), PersistenceError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "commits disabled".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load_attendees(&self) -> Result<Vec<AttendeeRecord>, PersistenceError> {
        Ok(self.attendees.lock().await.clone())
    }

    async fn commit_attendees(&self, records: &[AttendeeRecord]) -> Result<(), PersistenceError> {
        self.check_available()?;
        *self.attendees.lock().await = records.to_vec();
        Ok(())
    }

    async fn load_scans(&self) -> Result<Vec<ScanEvent>, PersistenceError> {
        Ok(self.scans.lock().await.clone())
    }

    async fn commit_scans(&self, events: &[ScanEvent]) -> Result<(), PersistenceError> {
        self.check_available()?;
        *self.scans.lock().await = events.to_vec();
        Ok(())
    }
}
