//! Attendee records and the import-row normalization step.
//!
//! Rows arrive from bulk imports with every field optional. This module is
//! the single place where a missing field becomes a defined default: once a
//! row is turned into an [`AttendeeRecord`] the rest of the crate never has to
//! guess about absent data.

use serde::{Deserialize, Serialize};

use crate::policy::{self, ScanType};

/// Attendee category, the input to the access policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendeeCategory {
    General,
    Sessions,
    Courses,
    Scholarship,
    Staff,
    Exhibitor,
    #[serde(other)]
    Unknown,
}

impl AttendeeCategory {
    pub const ALL: [AttendeeCategory; 7] = [
        AttendeeCategory::General,
        AttendeeCategory::Sessions,
        AttendeeCategory::Courses,
        AttendeeCategory::Scholarship,
        AttendeeCategory::Staff,
        AttendeeCategory::Exhibitor,
        AttendeeCategory::Unknown,
    ];

    /// Wire name (`"GENERAL"`, `"EXHIBITOR"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Sessions => "SESSIONS",
            Self::Courses => "COURSES",
            Self::Scholarship => "SCHOLARSHIP",
            Self::Staff => "STAFF",
            Self::Exhibitor => "EXHIBITOR",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Human-readable label for dashboards.
    pub fn label(self) -> &'static str {
        match self {
            Self::General => "General attendee",
            Self::Sessions => "Sessions attendee",
            Self::Courses => "Course attendee",
            Self::Scholarship => "Scholarship holder",
            Self::Staff => "Staff",
            Self::Exhibitor => "Exhibitor",
            Self::Unknown => "Attendee",
        }
    }

    /// Category implied by which optional import fields are filled in.
    fn derive(has_course: bool, has_session: bool, has_scholarship: bool) -> Self {
        match (has_course, has_session) {
            (true, true) => Self::General,
            (false, true) => Self::Sessions,
            (true, false) => Self::Courses,
            (false, false) if has_scholarship => Self::Scholarship,
            (false, false) => Self::Unknown,
        }
    }
}

impl std::fmt::Display for AttendeeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities computed once at import time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Permissions {
    pub entry: bool,
    pub sessions: bool,
    pub courses: bool,
    pub stands: bool,
}

impl Permissions {
    fn derive(category: AttendeeCategory, has_course: bool, has_session: bool) -> Self {
        Self {
            entry: policy::evaluate(category, ScanType::Entry).is_allowed(),
            sessions: has_session || policy::evaluate(category, ScanType::Session).is_allowed(),
            courses: has_course,
            stands: policy::evaluate(category, ScanType::Stand).is_allowed(),
        }
    }
}

/// Canonical form of attendee identifiers for one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdConvention {
    /// Digit-only ids are zero-padded to `width`; anything else is trimmed.
    Numeric { width: usize },
    /// Ids are compared after trimming only.
    FreeForm,
}

impl Default for IdConvention {
    fn default() -> Self {
        Self::Numeric { width: 4 }
    }
}

impl IdConvention {
    /// Build from the `id_width` config value (`0` selects free-form ids).
    pub fn from_width(width: usize) -> Self {
        if width == 0 {
            Self::FreeForm
        } else {
            Self::Numeric { width }
        }
    }

    /// Normalize a raw identifier. Returns `None` when nothing is left.
    pub fn normalize(self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match self {
            Self::Numeric { width } if trimmed.bytes().all(|b| b.is_ascii_digit()) => {
                let significant = trimmed.trim_start_matches('0');
                let significant = if significant.is_empty() {
                    "0"
                } else {
                    significant
                };
                Some(format!("{significant:0>width$}"))
            }
            Self::Numeric { .. } | Self::FreeForm => Some(trimmed.to_string()),
        }
    }
}

/// One attendee as stored in the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendeeRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub category: AttendeeCategory,
    #[serde(default)]
    pub is_scholarship: bool,
    #[serde(default)]
    pub permissions: Permissions,
}

impl AttendeeRecord {
    /// `"{given_name} {family_name}"`, the form matched by name lookups.
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.given_name.as_deref().unwrap_or_default(),
            self.family_name.as_deref().unwrap_or_default()
        )
    }

    /// Display-safe subset returned to scanners.
    pub fn summary(&self) -> AttendeeSummary {
        AttendeeSummary {
            id: self.id.clone(),
            given_name: self.given_name.clone(),
            family_name: self.family_name.clone(),
            organization: self.organization.clone(),
            category: self.category,
        }
    }
}

/// Redacted attendee view: no contact fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendeeSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub category: AttendeeCategory,
}

/// An import row as uploaded. Every field is optional on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AttendeeRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Course enrolment, if any. Non-empty grants the courses permission.
    #[serde(default)]
    pub course: Option<String>,
    /// Session enrolment, if any. Non-empty grants the sessions permission.
    #[serde(default)]
    pub session: Option<String>,
    /// Scholarship reference, if any. Non-empty sets `is_scholarship`.
    #[serde(default)]
    pub scholarship: Option<String>,
    /// Explicit category; wins over the one derived from enrolment fields.
    #[serde(default)]
    pub category: Option<AttendeeCategory>,
}

/// Why an import row was skipped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowError {
    pub index: usize,
    pub reason: String,
}

impl AttendeeRow {
    /// Turn a row into a record, or explain why it cannot be one.
    pub fn normalize(self, convention: IdConvention) -> Result<AttendeeRecord, String> {
        let id = self
            .id
            .as_deref()
            .and_then(|raw| convention.normalize(raw))
            .ok_or_else(|| "missing attendee id".to_string())?;

        let course = non_empty(self.course);
        let session = non_empty(self.session);
        let scholarship = non_empty(self.scholarship);

        let category = self.category.unwrap_or_else(|| {
            AttendeeCategory::derive(course.is_some(), session.is_some(), scholarship.is_some())
        });

        Ok(AttendeeRecord {
            id,
            given_name: non_empty(self.given_name),
            family_name: non_empty(self.family_name),
            organization: non_empty(self.organization),
            email: non_empty(self.email),
            phone: non_empty(self.phone),
            category,
            is_scholarship: scholarship.is_some(),
            permissions: Permissions::derive(category, course.is_some(), session.is_some()),
        })
    }
}

impl From<AttendeeRecord> for AttendeeRow {
    fn from(record: AttendeeRecord) -> Self {
        Self {
            id: Some(record.id),
            given_name: record.given_name,
            family_name: record.family_name,
            organization: record.organization,
            email: record.email,
            phone: record.phone,
            course: record.permissions.courses.then(|| "yes".to_string()),
            session: record.permissions.sessions.then(|| "yes".to_string()),
            scholarship: record.is_scholarship.then(|| "yes".to_string()),
            category: Some(record.category),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
