//! `checkin-core`: event check-in decision logic and its record store.
//!
//! Scanners submit QR-derived payloads; the [`ScanCoordinator`] resolves
//! them against the [`AttendeeDirectory`], applies the access table in
//! [`policy`], and records accepted scans exactly once in the
//! [`ScanLedger`]. Both stores persist through a [`SnapshotStore`].

pub mod attendee;
pub mod config;
pub mod contact_card;
pub mod coordinator;
pub mod directory;
pub mod ledger;
pub mod persistence;
pub mod policy;
pub mod stats;

pub use attendee::{
    AttendeeCategory, AttendeeRecord, AttendeeRow, AttendeeSummary, IdConvention, Permissions,
    RowError,
};
pub use config::{CheckinConfig, ConfigError};
pub use coordinator::{
    AttendeeHistory, CoordinatorError, RejectReason, ScanCancelled, ScanCoordinator,
    ScanRequest, ScanResponse, SyncReport,
};
pub use directory::{AttendeeDirectory, DirectoryError, ImportReport};
pub use ledger::{
    AppendOutcome, DuplicatePolicy, LedgerError, ScanDraft, ScanEvent, ScanLedger, ScanReceipt,
};
pub use persistence::{JsonFileStore, MemoryStore, PersistenceError, SnapshotStore};
pub use policy::{Decision, ScanType};
pub use stats::{DashboardStats, ScanCounters};
