//! Access policy: which attendee categories may pass which checkpoints.
//!
//! A pure lookup over (category, scan type). The table is total; every
//! category has an explicit row, `UNKNOWN` included.
//!
//! | category    | ENTRY | SESSION | STAND |
//! |-------------|-------|---------|-------|
//! | GENERAL     | allow | allow   | allow |
//! | SESSIONS    | allow | allow   | deny  |
//! | COURSES     | allow | deny    | deny  |
//! | SCHOLARSHIP | allow | allow   | allow |
//! | STAFF       | allow | allow   | allow |
//! | EXHIBITOR   | deny  | deny    | allow |
//! | UNKNOWN     | allow | deny    | allow |

use serde::{Deserialize, Serialize};

use crate::attendee::AttendeeCategory;

/// Checkpoint being scanned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanType {
    Entry,
    Session,
    Stand,
}

impl ScanType {
    pub const ALL: [ScanType; 3] = [ScanType::Entry, ScanType::Session, ScanType::Stand];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "ENTRY",
            Self::Session => "SESSION",
            Self::Stand => "STAND",
        }
    }
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Evaluate the access rule for one attendee category at one checkpoint.
pub fn evaluate(category: AttendeeCategory, scan_type: ScanType) -> Decision {
    use AttendeeCategory::*;
    use ScanType::*;

    let allowed = match (category, scan_type) {
        (General | Scholarship | Staff, _) => true,
        (Sessions, Entry | Session) => true,
        (Sessions, Stand) => false,
        (Courses, Entry) => true,
        (Courses, Session | Stand) => false,
        (Exhibitor, Stand) => true,
        (Exhibitor, Entry | Session) => false,
        (Unknown, Entry | Stand) => true,
        (Unknown, Session) => false,
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny(format!(
            "{} attendees are not allowed at {} checkpoints",
            category.label(),
            scan_type.as_str()
        ))
    }
}
