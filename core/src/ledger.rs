//! Scan ledger: the append-only log of accepted scans.
//!
//! Every append runs check-then-commit under a single writer gate, so two
//! concurrent appends sharing a duplicate key serialize and exactly one of
//! them wins. Readers clone an `Arc` snapshot and never wait on a commit,
//! only on the pointer swap that publishes it.
//!
//! The commit itself runs in a spawned task. Once a durable write has
//! started it always finishes and is published in memory, even if the
//! caller stops waiting.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::persistence::{PersistenceError, SnapshotStore};
use crate::policy::ScanType;

/// Which field combination the ledger refuses to store twice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// At most one scan per (attendee, scan type, day).
    #[default]
    AttendeeTypeDay,
    /// Only replays of the same caller `client_ref` are duplicates.
    ScanId,
}

impl DuplicatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AttendeeTypeDay => "attendee_type_day",
            Self::ScanId => "scan_id",
        }
    }
}

/// A stored scan. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanEvent {
    pub scan_id: String,
    pub attendee_id: String,
    pub scan_type: ScanType,
    pub day: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanned_by: Option<String>,
    /// Caller-supplied idempotency hint, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ScanEvent {
    /// Scanner-facing subset: no attendee id or operator fields.
    pub fn receipt(&self) -> ScanReceipt {
        ScanReceipt {
            scan_id: self.scan_id.clone(),
            scan_type: self.scan_type,
            day: self.day,
            timestamp: self.timestamp,
            location: self.location.clone(),
        }
    }
}

/// The recorded scan as echoed back on ACCEPTED.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanReceipt {
    pub scan_id: String,
    pub scan_type: ScanType,
    pub day: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Everything the caller decides about a scan; the ledger fills in the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanDraft {
    pub attendee_id: String,
    pub scan_type: ScanType,
    pub day: u32,
    pub location: Option<String>,
    pub scanned_by: Option<String>,
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(ScanEvent),
    /// Nothing was written; `existing` holds the key.
    Duplicate { existing: ScanEvent },
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(#[from] PersistenceError),

    #[error("append cancelled before commit")]
    Cancelled,

    #[error("commit task failed: {0}")]
    CommitTask(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DuplicateKey {
    Triple(String, ScanType, u32),
    ClientRef(String),
}

impl DuplicateKey {
    fn for_event(policy: DuplicatePolicy, event: &ScanEvent) -> Option<Self> {
        Self::build(
            policy,
            &event.attendee_id,
            event.scan_type,
            event.day,
            event.client_ref.as_deref(),
        )
    }

    fn for_draft(policy: DuplicatePolicy, draft: &ScanDraft) -> Option<Self> {
        Self::build(
            policy,
            &draft.attendee_id,
            draft.scan_type,
            draft.day,
            draft.client_ref.as_deref(),
        )
    }

    fn build(
        policy: DuplicatePolicy,
        attendee_id: &str,
        scan_type: ScanType,
        day: u32,
        client_ref: Option<&str>,
    ) -> Option<Self> {
        match policy {
            DuplicatePolicy::AttendeeTypeDay => {
                Some(Self::Triple(attendee_id.to_string(), scan_type, day))
            }
            DuplicatePolicy::ScanId => client_ref.map(|r| Self::ClientRef(r.to_string())),
        }
    }
}

/// Published ledger state: events in append order plus the duplicate index.
#[derive(Debug, Clone, Default)]
struct LedgerSnapshot {
    events: Vec<ScanEvent>,
    keys: HashMap<DuplicateKey, usize>,
}

impl LedgerSnapshot {
    fn rebuild(policy: DuplicatePolicy, events: Vec<ScanEvent>) -> Self {
        let mut keys = HashMap::new();
        for (idx, event) in events.iter().enumerate() {
            if let Some(key) = DuplicateKey::for_event(policy, event) {
                // Keep the first holder if an older snapshot already had collisions.
                keys.entry(key).or_insert(idx);
            }
        }
        Self { events, keys }
    }

    fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(|e| e.timestamp)
    }
}

struct LedgerInner {
    policy: DuplicatePolicy,
    store: Arc<dyn SnapshotStore>,
    /// Single-writer gate around check-then-commit.
    write_gate: Arc<Mutex<()>>,
    snapshot: RwLock<Arc<LedgerSnapshot>>,
}

/// Handle to the shared ledger. Cheap to clone.
#[derive(Clone)]
pub struct ScanLedger {
    inner: Arc<LedgerInner>,
}

impl ScanLedger {
    /// Load the last committed snapshot from `store` and index it.
    pub async fn open(
        store: Arc<dyn SnapshotStore>,
        policy: DuplicatePolicy,
    ) -> Result<Self, LedgerError> {
        let events = store.load_scans().await?;
        tracing::info!(
            scans = events.len(),
            policy = policy.as_str(),
            "scan ledger loaded"
        );
        let snapshot = LedgerSnapshot::rebuild(policy, events);
        Ok(Self {
            inner: Arc::new(LedgerInner {
                policy,
                store,
                write_gate: Arc::new(Mutex::new(())),
                snapshot: RwLock::new(Arc::new(snapshot)),
            }),
        })
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.inner.policy
    }

    async fn current(&self) -> Arc<LedgerSnapshot> {
        Arc::clone(&*self.inner.snapshot.read().await)
    }

    /// Append a scan unless its duplicate key is already taken.
    pub async fn append(&self, draft: ScanDraft) -> Result<AppendOutcome, LedgerError> {
        self.append_cancellable(draft, &CancellationToken::new())
            .await
    }

    /// Like [`append`](Self::append), but gives up with
    /// [`LedgerError::Cancelled`] if `cancel` fires before the durable write
    /// starts. After that point the write always completes.
    pub async fn append_cancellable(
        &self,
        draft: ScanDraft,
        cancel: &CancellationToken,
    ) -> Result<AppendOutcome, LedgerError> {
        let gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LedgerError::Cancelled),
            gate = Arc::clone(&self.inner.write_gate).lock_owned() => gate,
        };

        let current = self.current().await;
        let key = DuplicateKey::for_draft(self.inner.policy, &draft);
        if let Some(idx) = key.as_ref().and_then(|k| current.keys.get(k))
            && let Some(existing) = current.events.get(*idx)
        {
            return Ok(AppendOutcome::Duplicate {
                existing: existing.clone(),
            });
        }

        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }

        // Wall-clock, but never behind the previous event.
        let now = Utc::now();
        let timestamp = current.last_timestamp().map_or(now, |last| last.max(now));
        let event = ScanEvent {
            scan_id: Uuid::new_v4().to_string(),
            attendee_id: draft.attendee_id,
            scan_type: draft.scan_type,
            day: draft.day,
            location: draft.location,
            scanned_by: draft.scanned_by,
            client_ref: draft.client_ref,
            timestamp,
        };

        let mut next = (*current).clone();
        if let Some(key) = key {
            next.keys.insert(key, next.events.len());
        }
        next.events.push(event.clone());

        let inner = Arc::clone(&self.inner);
        let commit = tokio::spawn(async move {
            let _gate = gate;
            inner.store.commit_scans(&next.events).await?;
            *inner.snapshot.write().await = Arc::new(next);
            Ok::<(), PersistenceError>(())
        });

        commit
            .await
            .map_err(|e| LedgerError::CommitTask(e.to_string()))??;

        Ok(AppendOutcome::Appended(event))
    }

    /// Every event, in append order.
    pub async fn list_all(&self) -> Vec<ScanEvent> {
        self.current().await.events.clone()
    }

    /// Events for one attendee, in append order.
    pub async fn list_for_attendee(&self, attendee_id: &str) -> Vec<ScanEvent> {
        self.current()
            .await
            .events
            .iter()
            .filter(|e| e.attendee_id == attendee_id)
            .cloned()
            .collect()
    }

    /// The `n` most recent events, newest first.
    pub async fn recent(&self, n: usize) -> Vec<ScanEvent> {
        let snapshot = self.current().await;
        let mut newest_first: Vec<&ScanEvent> = snapshot.events.iter().rev().collect();
        // Stable: equal timestamps keep the later append first.
        newest_first.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        newest_first.into_iter().take(n).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.current().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use pretty_assertions::assert_eq;

    fn draft(attendee_id: &str, scan_type: ScanType, day: u32) -> ScanDraft {
        ScanDraft {
            attendee_id: attendee_id.to_string(),
            scan_type,
            day,
            location: Some("Hall A".to_string()),
            scanned_by: Some("gate-1".to_string()),
            client_ref: None,
        }
    }

    async fn open_ledger(policy: DuplicatePolicy) -> (Arc<MemoryStore>, ScanLedger) {
        let store = Arc::new(MemoryStore::new());
        let ledger = ScanLedger::open(store.clone(), policy).await.unwrap();
        (store, ledger)
    }

    fn appended(outcome: AppendOutcome) -> ScanEvent {
        match outcome {
            AppendOutcome::Appended(event) => event,
            AppendOutcome::Duplicate { existing } => {
                panic!("expected append, got duplicate of {}", existing.scan_id)
            }
        }
    }

    #[tokio::test]
    async fn append_assigns_id_and_timestamp_and_persists() {
        let (store, ledger) = open_ledger(DuplicatePolicy::AttendeeTypeDay).await;

        let event = appended(
            ledger
                .append(draft("0001", ScanType::Entry, 1))
                .await
                .unwrap(),
        );
        assert!(!event.scan_id.is_empty());
        assert_eq!(event.attendee_id, "0001");
        assert_eq!(event.location.as_deref(), Some("Hall A"));

        assert_eq!(ledger.list_all().await, vec![event.clone()]);
        assert_eq!(store.load_scans().await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn triple_policy_rejects_same_attendee_type_day() {
        let (store, ledger) = open_ledger(DuplicatePolicy::AttendeeTypeDay).await;

        let first = appended(
            ledger
                .append(draft("0001", ScanType::Stand, 1))
                .await
                .unwrap(),
        );
        let second = ledger
            .append(draft("0001", ScanType::Stand, 1))
            .await
            .unwrap();
        assert_eq!(second, AppendOutcome::Duplicate { existing: first });

        // Different day and different type are separate keys.
        appended(
            ledger
                .append(draft("0001", ScanType::Stand, 2))
                .await
                .unwrap(),
        );
        appended(
            ledger
                .append(draft("0001", ScanType::Entry, 1))
                .await
                .unwrap(),
        );
        assert_eq!(ledger.len().await, 3);
        assert_eq!(store.load_scans().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn scan_id_policy_only_rejects_client_ref_replays() {
        let (_store, ledger) = open_ledger(DuplicatePolicy::ScanId).await;

        appended(
            ledger
                .append(draft("0001", ScanType::Entry, 1))
                .await
                .unwrap(),
        );
        appended(
            ledger
                .append(draft("0001", ScanType::Entry, 1))
                .await
                .unwrap(),
        );

        let with_ref = ScanDraft {
            client_ref: Some("phone-7:42".to_string()),
            ..draft("0001", ScanType::Entry, 1)
        };
        appended(ledger.append(with_ref.clone()).await.unwrap());
        assert!(matches!(
            ledger.append(with_ref).await.unwrap(),
            AppendOutcome::Duplicate { .. }
        ));
        assert_eq!(ledger.len().await, 3);
    }

    #[tokio::test]
    async fn failed_commit_leaves_ledger_unchanged() {
        let (store, ledger) = open_ledger(DuplicatePolicy::AttendeeTypeDay).await;

        store.set_fail_commits(true);
        let err = ledger
            .append(draft("0001", ScanType::Entry, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(_)), "{err}");
        assert!(ledger.is_empty().await);

        // The key was never taken, so a retry succeeds once storage is back.
        store.set_fail_commits(false);
        appended(
            ledger
                .append(draft("0001", ScanType::Entry, 1))
                .await
                .unwrap(),
        );
    }

    #[tokio::test]
    async fn cancelled_append_writes_nothing() {
        let (store, ledger) = open_ledger(DuplicatePolicy::AttendeeTypeDay).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ledger
            .append_cancellable(draft("0001", ScanType::Entry, 1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled));
        assert!(ledger.is_empty().await);
        assert!(store.load_scans().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_appends_store_exactly_one() {
        let (store, ledger) = open_ledger(DuplicatePolicy::AttendeeTypeDay).await;

        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.append(draft("0042", ScanType::Session, 2)).await
            }));
        }

        let mut appended_count = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                AppendOutcome::Appended(_) => appended_count += 1,
                AppendOutcome::Duplicate { .. } => duplicates += 1,
            }
        }
        assert_eq!(appended_count, 1);
        assert_eq!(duplicates, 31);
        assert_eq!(store.load_scans().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reopen_rebuilds_duplicate_index() {
        let store = Arc::new(MemoryStore::new());
        {
            let ledger = ScanLedger::open(store.clone(), DuplicatePolicy::AttendeeTypeDay)
                .await
                .unwrap();
            appended(
                ledger
                    .append(draft("0001", ScanType::Entry, 1))
                    .await
                    .unwrap(),
            );
        }

        let reopened = ScanLedger::open(store, DuplicatePolicy::AttendeeTypeDay)
            .await
            .unwrap();
        assert_eq!(reopened.len().await, 1);
        assert!(matches!(
            reopened
                .append(draft("0001", ScanType::Entry, 1))
                .await
                .unwrap(),
            AppendOutcome::Duplicate { .. }
        ));
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_bounded() {
        let (_store, ledger) = open_ledger(DuplicatePolicy::AttendeeTypeDay).await;
        let mut ids = Vec::new();
        for day in 1..=5 {
            let event = appended(
                ledger
                    .append(draft("0001", ScanType::Entry, day))
                    .await
                    .unwrap(),
            );
            ids.push(event.scan_id);
        }

        let recent: Vec<String> = ledger
            .recent(3)
            .await
            .into_iter()
            .map(|e| e.scan_id)
            .collect();
        let expected: Vec<String> = ids.iter().rev().take(3).cloned().collect();
        assert_eq!(recent, expected);
        assert_eq!(ledger.recent(100).await.len(), 5);

        let timestamps: Vec<_> = ledger.list_all().await.iter().map(|e| e.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn list_for_attendee_filters_in_ledger_order() {
        let (_store, ledger) = open_ledger(DuplicatePolicy::AttendeeTypeDay).await;
        appended(ledger.append(draft("0001", ScanType::Entry, 1)).await.unwrap());
        appended(ledger.append(draft("0002", ScanType::Entry, 1)).await.unwrap());
        appended(ledger.append(draft("0001", ScanType::Stand, 1)).await.unwrap());

        let types: Vec<ScanType> = ledger
            .list_for_attendee("0001")
            .await
            .into_iter()
            .map(|e| e.scan_type)
            .collect();
        assert_eq!(types, vec![ScanType::Entry, ScanType::Stand]);
        assert!(ledger.list_for_attendee("0003").await.is_empty());
    }
}
