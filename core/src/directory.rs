//! Attendee directory: the roster every scan is resolved against.
//!
//! Imports build a complete new snapshot, commit it to the store, and only
//! then swap it in. A concurrent `lookup` sees either the old roster or the
//! new one, never a mix.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::attendee::{AttendeeRecord, AttendeeRow, IdConvention, RowError};
use crate::persistence::{PersistenceError, SnapshotStore};

/// Result of a bulk import: how many records are now stored from this batch
/// and which rows were skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportReport {
    pub stored: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RowError>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory storage error: {0}")]
    Storage(#[from] PersistenceError),

    #[error("commit task failed: {0}")]
    CommitTask(String),
}

/// Published roster: records in storage order plus lookup indexes.
#[derive(Debug, Clone, Default)]
struct DirectorySnapshot {
    records: Vec<AttendeeRecord>,
    by_id: HashMap<String, usize>,
    /// Lowercased email -> first record carrying it.
    by_email: HashMap<String, usize>,
    /// Lowercased `"{given} {family}"` -> first record rendering to it.
    by_name: HashMap<String, usize>,
}

impl DirectorySnapshot {
    fn build(records: Vec<AttendeeRecord>) -> Self {
        let mut by_id = HashMap::with_capacity(records.len());
        let mut by_email = HashMap::new();
        let mut by_name = HashMap::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            by_id.entry(record.id.clone()).or_insert(idx);
            if let Some(email) = record.email.as_deref() {
                by_email.entry(email.to_lowercase()).or_insert(idx);
            }
            by_name.entry(record.full_name().to_lowercase()).or_insert(idx);
        }
        Self {
            records,
            by_id,
            by_email,
            by_name,
        }
    }

    fn get(&self, idx: Option<&usize>) -> Option<AttendeeRecord> {
        idx.and_then(|i| self.records.get(*i)).cloned()
    }
}

struct DirectoryInner {
    convention: IdConvention,
    store: Arc<dyn SnapshotStore>,
    write_gate: Arc<Mutex<()>>,
    snapshot: RwLock<Arc<DirectorySnapshot>>,
}

/// Handle to the shared directory. Cheap to clone.
#[derive(Clone)]
pub struct AttendeeDirectory {
    inner: Arc<DirectoryInner>,
}

impl AttendeeDirectory {
    /// Load the last committed roster from `store`.
    ///
    /// Stored ids are re-normalized with `convention`, so a roster written
    /// under a different id width is still looked up consistently. Records
    /// whose ids collapse to the same canonical id keep only the first one
    /// in storage order.
    pub async fn open(
        store: Arc<dyn SnapshotStore>,
        convention: IdConvention,
    ) -> Result<Self, DirectoryError> {
        let stored = store.load_attendees().await?;
        let mut seen = HashSet::with_capacity(stored.len());
        let mut records = Vec::with_capacity(stored.len());
        for mut record in stored {
            let Some(id) = convention.normalize(&record.id) else {
                tracing::warn!(id = %record.id, "stored attendee dropped: unusable id");
                continue;
            };
            if !seen.insert(id.clone()) {
                tracing::warn!(
                    stored_id = %record.id,
                    canonical_id = %id,
                    "stored attendee dropped: canonical id already loaded"
                );
                continue;
            }
            record.id = id;
            records.push(record);
        }
        tracing::info!(attendees = records.len(), "attendee directory loaded");

        Ok(Self {
            inner: Arc::new(DirectoryInner {
                convention,
                store,
                write_gate: Arc::new(Mutex::new(())),
                snapshot: RwLock::new(Arc::new(DirectorySnapshot::build(records))),
            }),
        })
    }

    pub fn convention(&self) -> IdConvention {
        self.inner.convention
    }

    async fn current(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&*self.inner.snapshot.read().await)
    }

    /// Replace the whole roster with `rows`. Malformed rows are skipped and
    /// reported; the rest become the new roster.
    pub async fn replace_all(&self, rows: Vec<AttendeeRow>) -> Result<ImportReport, DirectoryError> {
        let gate = Arc::clone(&self.inner.write_gate).lock_owned().await;
        let (records, rejected) = self.normalize_batch(rows);
        let report = ImportReport {
            stored: records.len(),
            rejected,
        };
        self.commit(gate, DirectorySnapshot::build(records)).await?;

        tracing::info!(
            stored = report.stored,
            rejected = report.rejected.len(),
            "attendee directory replaced"
        );
        Ok(report)
    }

    /// Merge `rows` into the roster. A record whose id already exists
    /// replaces the old one in place; new ids are appended.
    pub async fn add(&self, rows: Vec<AttendeeRow>) -> Result<ImportReport, DirectoryError> {
        let gate = Arc::clone(&self.inner.write_gate).lock_owned().await;
        let (incoming, rejected) = self.normalize_batch(rows);
        let report = ImportReport {
            stored: incoming.len(),
            rejected,
        };

        let current = self.current().await;
        let mut records = current.records.clone();
        let mut replaced = 0;
        for record in incoming {
            match current.by_id.get(&record.id) {
                Some(&idx) => {
                    records[idx] = record;
                    replaced += 1;
                }
                None => records.push(record),
            }
        }
        self.commit(gate, DirectorySnapshot::build(records)).await?;

        tracing::info!(
            stored = report.stored,
            replaced,
            rejected = report.rejected.len(),
            "attendees added"
        );
        Ok(report)
    }

    fn normalize_batch(&self, rows: Vec<AttendeeRow>) -> (Vec<AttendeeRecord>, Vec<RowError>) {
        let mut records = Vec::with_capacity(rows.len());
        let mut rejected = Vec::new();
        let mut seen = HashSet::with_capacity(rows.len());

        for (index, row) in rows.into_iter().enumerate() {
            match row.normalize(self.inner.convention) {
                Ok(record) if seen.insert(record.id.clone()) => records.push(record),
                Ok(record) => rejected.push(RowError {
                    index,
                    reason: format!("duplicate attendee id {} in batch", record.id),
                }),
                Err(reason) => rejected.push(RowError { index, reason }),
            }
        }

        for row in &rejected {
            tracing::warn!(index = row.index, reason = %row.reason, "import row skipped");
        }
        (records, rejected)
    }

    /// Persist `next` and publish it. Runs detached so a dropped caller
    /// cannot interrupt a write that has already started.
    async fn commit(
        &self,
        gate: tokio::sync::OwnedMutexGuard<()>,
        next: DirectorySnapshot,
    ) -> Result<(), DirectoryError> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _gate = gate;
            inner.store.commit_attendees(&next.records).await?;
            *inner.snapshot.write().await = Arc::new(next);
            Ok::<(), PersistenceError>(())
        });
        task.await
            .map_err(|e| DirectoryError::CommitTask(e.to_string()))??;
        Ok(())
    }

    /// Find an attendee by identifier, normalized the same way imports are.
    pub async fn lookup(&self, id: &str) -> Option<AttendeeRecord> {
        let id = self.inner.convention.normalize(id)?;
        let snapshot = self.current().await;
        snapshot.get(snapshot.by_id.get(&id))
    }

    /// Case-insensitive exact match on email.
    pub async fn lookup_by_contact(&self, email: &str) -> Option<AttendeeRecord> {
        let email = email.trim();
        if email.is_empty() {
            return None;
        }
        let snapshot = self.current().await;
        snapshot.get(snapshot.by_email.get(&email.to_lowercase()))
    }

    /// Case-insensitive exact match on `"{given_name} {family_name}"`.
    /// With several matches the first one in storage order wins.
    pub async fn lookup_by_name(&self, full_name: &str) -> Option<AttendeeRecord> {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return None;
        }
        let snapshot = self.current().await;
        snapshot.get(snapshot.by_name.get(&full_name.to_lowercase()))
    }

    /// Every record, in storage order.
    pub async fn list(&self) -> Vec<AttendeeRecord> {
        self.current().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.current().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
