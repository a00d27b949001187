//! Scan coordinator: turns a raw scan request into ACCEPTED or REJECTED.
//!
//! ```text
//! RECEIVED ──resolve──▶ RESOLVED ──policy──▶ POLICY_CHECKED ──append──▶ ACCEPTED
//!     │                    │                       │
//!     └── NOT_FOUND /      └── ACCESS_DENIED       └── DUPLICATE_SCAN /
//!         INVALID_REQUEST                              STORAGE_FAILURE
//! ```
//!
//! Every failure becomes a [`RejectReason`]; nothing is retried here. The
//! only side effect is the ledger append on the accept path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::attendee::{AttendeeRecord, AttendeeRow, AttendeeSummary};
use crate::config::CheckinConfig;
use crate::contact_card::ScanPayload;
use crate::directory::{AttendeeDirectory, DirectoryError, ImportReport};
use crate::ledger::{AppendOutcome, LedgerError, ScanDraft, ScanEvent, ScanLedger, ScanReceipt};
use crate::persistence::SnapshotStore;
use crate::policy::{self, Decision, ScanType};
use crate::stats::{DashboardStats, ScanCounters};

/// Longest slice of a raw payload echoed back in a NOT_FOUND diagnostic.
const DIAGNOSTIC_PAYLOAD_CHARS: usize = 50;

const STORAGE_FAILURE_MESSAGE: &str = "scan could not be stored, please retry";

/// One scan as submitted by a scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRequest {
    /// Bare attendee id or contact-card text, optionally base64.
    pub payload: String,
    pub scan_type: ScanType,
    pub day: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanned_by: Option<String>,
    /// Idempotency hint; the duplicate key under the `scan_id` policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    NotFound,
    AccessDenied,
    DuplicateScan,
    InvalidRequest,
    StorageFailure,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::DuplicateScan => "DUPLICATE_SCAN",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::StorageFailure => "STORAGE_FAILURE",
        }
    }

    /// Whether resubmitting the same request could succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::StorageFailure)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one scan request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanResponse {
    Accepted {
        attendee: AttendeeSummary,
        scan: ScanReceipt,
        counters: ScanCounters,
    },
    Rejected {
        reason: RejectReason,
        message: String,
        /// Resolved attendee, when rejection happened after resolution.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attendee: Option<AttendeeSummary>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diagnostic: Option<String>,
    },
}

impl ScanResponse {
    pub fn rejected(reason: RejectReason, message: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            message: message.into(),
            attendee: None,
            diagnostic: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Accepted { .. } => None,
            Self::Rejected { reason, .. } => Some(*reason),
        }
    }
}

/// The caller gave up before the scan reached the ledger; nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("scan request cancelled before commit")]
pub struct ScanCancelled;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// An attendee and every scan recorded for them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendeeHistory {
    pub attendee: AttendeeRecord,
    pub scans: Vec<ScanEvent>,
}

/// Outcome of replaying a batch of offline scans.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub accepted: usize,
    pub duplicates: usize,
    /// Rejections other than duplicates.
    pub rejected: usize,
    /// One response per submitted scan, in submission order.
    pub results: Vec<ScanResponse>,
}

/// Orchestrates directory, policy and ledger for each scan.
#[derive(Clone)]
pub struct ScanCoordinator {
    directory: AttendeeDirectory,
    ledger: ScanLedger,
    event_days: u32,
    recent_limit: usize,
}

impl ScanCoordinator {
    pub fn new(directory: AttendeeDirectory, ledger: ScanLedger, config: &CheckinConfig) -> Self {
        Self {
            directory,
            ledger,
            event_days: config.event_days,
            recent_limit: config.recent_limit,
        }
    }

    /// Load directory and ledger from `store` using `config`.
    pub async fn open(
        store: Arc<dyn SnapshotStore>,
        config: &CheckinConfig,
    ) -> Result<Self, CoordinatorError> {
        let directory = AttendeeDirectory::open(Arc::clone(&store), config.id_convention()).await?;
        let ledger = ScanLedger::open(store, config.duplicate_policy).await?;
        Ok(Self::new(directory, ledger, config))
    }

    pub fn directory(&self) -> &AttendeeDirectory {
        &self.directory
    }

    pub fn ledger(&self) -> &ScanLedger {
        &self.ledger
    }

    pub fn event_days(&self) -> u32 {
        self.event_days
    }

    /// Run one scan request to a terminal state.
    pub async fn submit(&self, request: ScanRequest) -> ScanResponse {
        let never = CancellationToken::new();
        match self.submit_cancellable(request, &never).await {
            Ok(response) => response,
            Err(ScanCancelled) => {
                ScanResponse::rejected(RejectReason::InvalidRequest, "request cancelled")
            }
        }
    }

    /// Like [`submit`](Self::submit), but stops with [`ScanCancelled`] if
    /// `cancel` fires before the ledger starts its durable write.
    pub async fn submit_cancellable(
        &self,
        request: ScanRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanResponse, ScanCancelled> {
        if cancel.is_cancelled() {
            return Err(ScanCancelled);
        }
        tracing::debug!(
            scan_type = %request.scan_type,
            day = request.day,
            "scan received"
        );

        if let Err(message) = self.validate(&request) {
            tracing::warn!(%message, "scan rejected: invalid request");
            return Ok(ScanResponse::rejected(RejectReason::InvalidRequest, message));
        }

        // RECEIVED -> RESOLVED
        let Some(attendee) = self.resolve(&request.payload).await else {
            let diagnostic: String = request
                .payload
                .chars()
                .take(DIAGNOSTIC_PAYLOAD_CHARS)
                .collect();
            tracing::warn!(payload = %diagnostic, "scan rejected: attendee not found");
            return Ok(ScanResponse::Rejected {
                reason: RejectReason::NotFound,
                message: "attendee not found for scanned code".to_string(),
                attendee: None,
                diagnostic: Some(diagnostic),
            });
        };
        tracing::debug!(attendee_id = %attendee.id, "scan resolved");

        // RESOLVED -> POLICY_CHECKED
        if let Decision::Deny(reason) = policy::evaluate(attendee.category, request.scan_type) {
            tracing::warn!(
                attendee_id = %attendee.id,
                category = %attendee.category,
                scan_type = %request.scan_type,
                "scan rejected: access denied"
            );
            return Ok(ScanResponse::Rejected {
                reason: RejectReason::AccessDenied,
                message: reason,
                attendee: Some(attendee.summary()),
                diagnostic: None,
            });
        }
        tracing::debug!(attendee_id = %attendee.id, "policy checked");

        // POLICY_CHECKED -> ACCEPTED
        let day = request.day;
        let draft = ScanDraft {
            attendee_id: attendee.id.clone(),
            scan_type: request.scan_type,
            day,
            location: request.location,
            scanned_by: request.scanned_by,
            client_ref: request.client_ref,
        };
        let outcome = match self.ledger.append_cancellable(draft, cancel).await {
            Ok(outcome) => outcome,
            Err(LedgerError::Cancelled) => return Err(ScanCancelled),
            Err(err) => {
                tracing::warn!(attendee_id = %attendee.id, error = %err, "scan rejected: storage failure");
                return Ok(ScanResponse::Rejected {
                    reason: RejectReason::StorageFailure,
                    message: STORAGE_FAILURE_MESSAGE.to_string(),
                    attendee: Some(attendee.summary()),
                    diagnostic: None,
                });
            }
        };

        match outcome {
            AppendOutcome::Appended(scan) => {
                tracing::info!(
                    attendee_id = %scan.attendee_id,
                    scan_id = %scan.scan_id,
                    scan_type = %scan.scan_type,
                    day = scan.day,
                    "scan accepted"
                );
                let counters = self.counters(day).await;
                Ok(ScanResponse::Accepted {
                    attendee: attendee.summary(),
                    scan: scan.receipt(),
                    counters,
                })
            }
            AppendOutcome::Duplicate { existing } => {
                tracing::info!(
                    attendee_id = %attendee.id,
                    existing_scan_id = %existing.scan_id,
                    "scan rejected: duplicate"
                );
                Ok(ScanResponse::Rejected {
                    reason: RejectReason::DuplicateScan,
                    message: format!(
                        "already scanned for {} on day {} at {}",
                        existing.scan_type,
                        existing.day,
                        existing.timestamp.to_rfc3339()
                    ),
                    attendee: Some(attendee.summary()),
                    diagnostic: None,
                })
            }
        }
    }

    fn validate(&self, request: &ScanRequest) -> Result<(), String> {
        if request.payload.trim().is_empty() {
            return Err("payload is empty".to_string());
        }
        if !(1..=self.event_days).contains(&request.day) {
            return Err(format!(
                "day {} is outside 1..={}",
                request.day, self.event_days
            ));
        }
        Ok(())
    }

    /// Bare ids go straight to the id index; contact cards try email first,
    /// then the rendered full name.
    async fn resolve(&self, payload: &str) -> Option<AttendeeRecord> {
        match ScanPayload::parse(payload)? {
            ScanPayload::AttendeeId(id) => self.directory.lookup(&id).await,
            ScanPayload::ContactCard { email, full_name } => {
                if let Some(email) = email.as_deref()
                    && let Some(found) = self.directory.lookup_by_contact(email).await
                {
                    return Some(found);
                }
                match full_name.as_deref() {
                    Some(name) => self.directory.lookup_by_name(name).await,
                    None => None,
                }
            }
        }
    }

    async fn counters(&self, day: u32) -> ScanCounters {
        let scans = self.ledger.list_all().await;
        ScanCounters::compute(self.directory.len().await, &scans, day)
    }

    /// Replay scans captured while a scanner was offline, in order.
    pub async fn sync(&self, requests: Vec<ScanRequest>) -> SyncReport {
        let never = CancellationToken::new();
        match self.sync_cancellable(requests, &never).await {
            Ok(report) => report,
            Err(ScanCancelled) => SyncReport::default(),
        }
    }

    /// Like [`sync`](Self::sync), but stops with [`ScanCancelled`] once
    /// `cancel` fires. Scans accepted before that stay recorded; replaying
    /// the batch reports them as duplicates.
    pub async fn sync_cancellable(
        &self,
        requests: Vec<ScanRequest>,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, ScanCancelled> {
        let mut report = SyncReport {
            results: Vec::with_capacity(requests.len()),
            ..SyncReport::default()
        };
        for request in requests {
            let response = self.submit_cancellable(request, cancel).await?;
            match response.reject_reason() {
                None => report.accepted += 1,
                Some(RejectReason::DuplicateScan) => report.duplicates += 1,
                Some(_) => report.rejected += 1,
            }
            report.results.push(response);
        }
        tracing::info!(
            accepted = report.accepted,
            duplicates = report.duplicates,
            rejected = report.rejected,
            "offline scans synced"
        );
        Ok(report)
    }

    pub async fn attendee_history(&self, id: &str) -> Option<AttendeeHistory> {
        let attendee = self.directory.lookup(id).await?;
        let scans = self.ledger.list_for_attendee(&attendee.id).await;
        Some(AttendeeHistory { attendee, scans })
    }

    pub async fn replace_attendees(
        &self,
        rows: Vec<AttendeeRow>,
    ) -> Result<ImportReport, DirectoryError> {
        self.directory.replace_all(rows).await
    }

    pub async fn add_attendees(&self, rows: Vec<AttendeeRow>) -> Result<ImportReport, DirectoryError> {
        self.directory.add(rows).await
    }

    pub async fn list_attendees(&self) -> Vec<AttendeeRecord> {
        self.directory.list().await
    }

    /// All scans, or one attendee's scans when `attendee_id` is given.
    pub async fn list_scans(&self, attendee_id: Option<&str>) -> Vec<ScanEvent> {
        match attendee_id {
            Some(raw) => match self.directory.convention().normalize(raw) {
                Some(id) => self.ledger.list_for_attendee(&id).await,
                None => Vec::new(),
            },
            None => self.ledger.list_all().await,
        }
    }

    /// Most recent scans, newest first. `None` uses the configured limit.
    pub async fn recent(&self, limit: Option<usize>) -> Vec<ScanEvent> {
        self.ledger.recent(limit.unwrap_or(self.recent_limit)).await
    }

    pub async fn stats(&self) -> DashboardStats {
        let attendees = self.directory.list().await;
        let scans = self.ledger.list_all().await;
        DashboardStats::compute(&attendees, &scans, self.event_days)
    }
}
