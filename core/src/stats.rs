//! Dashboard aggregates over the roster and the ledger.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::attendee::{AttendeeCategory, AttendeeRecord};
use crate::ledger::ScanEvent;
use crate::policy::ScanType;

/// Counters returned alongside every accepted scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanCounters {
    pub total_attendees: usize,
    pub total_scans: usize,
    pub scans_by_type: BTreeMap<ScanType, usize>,
    pub day: u32,
    /// Distinct attendees with at least one scan on `day`.
    pub unique_attendees_today: usize,
}

impl ScanCounters {
    pub fn compute(total_attendees: usize, scans: &[ScanEvent], day: u32) -> Self {
        let unique_today: BTreeSet<&str> = scans
            .iter()
            .filter(|s| s.day == day)
            .map(|s| s.attendee_id.as_str())
            .collect();
        Self {
            total_attendees,
            total_scans: scans.len(),
            scans_by_type: count_by_type(scans),
            day,
            unique_attendees_today: unique_today.len(),
        }
    }
}

/// Everything the dashboard renders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardStats {
    pub total_attendees: usize,
    pub total_scans: usize,
    pub scans_by_type: BTreeMap<ScanType, usize>,
    pub attendees_by_category: BTreeMap<AttendeeCategory, usize>,
    pub scholarship_count: usize,
    pub scans_by_day: BTreeMap<u32, usize>,
    pub unique_attendees_by_day: BTreeMap<u32, usize>,
}

impl DashboardStats {
    /// Days `1..=event_days` always appear, with zero counts if nothing was
    /// scanned; days outside that range appear only if scans exist for them.
    pub fn compute(attendees: &[AttendeeRecord], scans: &[ScanEvent], event_days: u32) -> Self {
        let mut attendees_by_category: BTreeMap<AttendeeCategory, usize> =
            AttendeeCategory::ALL.iter().map(|c| (*c, 0)).collect();
        for record in attendees {
            *attendees_by_category.entry(record.category).or_default() += 1;
        }

        let mut scans_by_day: BTreeMap<u32, usize> = (1..=event_days).map(|d| (d, 0)).collect();
        let mut attendees_by_day: BTreeMap<u32, BTreeSet<&str>> = BTreeMap::new();
        for scan in scans {
            *scans_by_day.entry(scan.day).or_default() += 1;
            attendees_by_day
                .entry(scan.day)
                .or_default()
                .insert(scan.attendee_id.as_str());
        }
        let unique_attendees_by_day = scans_by_day
            .keys()
            .map(|day| (*day, attendees_by_day.get(day).map_or(0, BTreeSet::len)))
            .collect();

        Self {
            total_attendees: attendees.len(),
            total_scans: scans.len(),
            scans_by_type: count_by_type(scans),
            attendees_by_category,
            scholarship_count: attendees.iter().filter(|a| a.is_scholarship).count(),
            scans_by_day,
            unique_attendees_by_day,
        }
    }
}

fn count_by_type(scans: &[ScanEvent]) -> BTreeMap<ScanType, usize> {
    let mut counts: BTreeMap<ScanType, usize> = ScanType::ALL.iter().map(|t| (*t, 0)).collect();
    for scan in scans {
        *counts.entry(scan.scan_type).or_default() += 1;
    }
    counts
}
