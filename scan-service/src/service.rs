//! Per-process service state shared by every connection.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use checkin_core::ScanCoordinator;
use tokio_util::sync::CancellationToken;

use crate::protocol::ServiceStatusResult;

/// Coordinator plus the bookkeeping `service.status` reports.
pub struct CheckinService {
    coordinator: ScanCoordinator,
    /// Service start time.
    started_at: Instant,
    /// Active connection count.
    connection_count: AtomicU32,
    /// Fired when the process begins shutting down.
    shutdown: CancellationToken,
}

impl CheckinService {
    pub fn new(coordinator: ScanCoordinator) -> Self {
        Self::with_shutdown(coordinator, CancellationToken::new())
    }

    pub fn with_shutdown(coordinator: ScanCoordinator, shutdown: CancellationToken) -> Self {
        Self {
            coordinator,
            started_at: Instant::now(),
            connection_count: AtomicU32::new(0),
            shutdown,
        }
    }

    pub fn coordinator(&self) -> &ScanCoordinator {
        &self.coordinator
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Service uptime in seconds.
    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn inc_connections(&self) -> u32 {
        self.connection_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn dec_connections(&self) -> u32 {
        self.connection_count
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1)
    }

    pub fn connection_count(&self) -> u32 {
        self.connection_count.load(Ordering::Relaxed)
    }

    pub async fn status(&self) -> ServiceStatusResult {
        ServiceStatusResult {
            uptime_s: self.uptime_s(),
            attendees: self.coordinator.directory().len().await,
            scans: self.coordinator.ledger().len().await,
            connections: self.connection_count(),
            duplicate_policy: self.coordinator.ledger().policy(),
            event_days: self.coordinator.event_days(),
        }
    }
}
