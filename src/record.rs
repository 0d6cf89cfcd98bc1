// src/record.rs - Alarm records, notes and query filters
//
// Records are plain values. Providers own the stored copies and hand out
// clones, so a record held by a cursor or a streamer is a snapshot.

use crate::engine::Handle;
use crate::error::{AlarmError, Result};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Record timestamps keep millisecond precision, the resolution the SQL
/// store persists, so both providers order and bound records alike.
pub fn record_time(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

// ============================================================================
// ALARM STATE
// ============================================================================

/// Alarm state of a watch, and the type of a record
///
/// Records are never created as `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AlarmState {
    #[default]
    Normal,
    /// Informational, closes without acknowledgement
    Alert,
    Fault,
    Offnormal,
}

impl AlarmState {
    pub const ALL: [AlarmState; 4] = [
        AlarmState::Normal,
        AlarmState::Alert,
        AlarmState::Fault,
        AlarmState::Offnormal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Normal => "Normal",
            AlarmState::Alert => "Alert",
            AlarmState::Fault => "Fault",
            AlarmState::Offnormal => "Offnormal",
        }
    }

    pub fn is_alarm(&self) -> bool {
        !matches!(self, AlarmState::Normal)
    }

    /// Records of this type need an acknowledgement before they close
    pub fn requires_ack(&self) -> bool {
        matches!(self, AlarmState::Fault | AlarmState::Offnormal)
    }

    /// Parse a severity that may be used for a new record
    pub fn alarm_severity(s: &str) -> Result<Self> {
        match s.parse::<AlarmState>()? {
            AlarmState::Normal => Err(AlarmError::InvalidParameter(
                "alarm type cannot be Normal".to_string(),
            )),
            other => Ok(other),
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmState {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self> {
        AlarmState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AlarmError::InvalidParameter(format!("unknown alarm state '{}'", s)))
    }
}

// ============================================================================
// RECORDS AND NOTES
// ============================================================================

/// A single alarm occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub id: Uuid,
    pub source_path: String,
    /// Name of the owning class; the class may since have been deleted
    pub alarm_class: String,
    /// Handle of the watch that raised the alarm, if any
    pub watch: Option<Handle>,
    pub alarm_type: AlarmState,
    pub created_time: DateTime<Utc>,
    pub normal_time: Option<DateTime<Utc>>,
    pub ack_time: Option<DateTime<Utc>>,
    pub ack_user: Option<String>,
    pub message: String,
    pub has_notes: bool,
}

impl AlarmRecord {
    pub fn new(
        id: Uuid,
        alarm_class: impl Into<String>,
        watch: Option<Handle>,
        source_path: impl Into<String>,
        alarm_type: AlarmState,
        message: impl Into<String>,
        created_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_path: source_path.into(),
            alarm_class: alarm_class.into(),
            watch,
            alarm_type,
            created_time: record_time(created_time),
            normal_time: None,
            ack_time: None,
            ack_user: None,
            message: message.into(),
            has_notes: false,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.ack_time.is_some()
    }

    pub fn is_normal(&self) -> bool {
        self.normal_time.is_some()
    }

    pub fn is_ack_required(&self) -> bool {
        self.alarm_type.requires_ack()
    }

    pub fn is_closed(&self) -> bool {
        self.is_normal() && (!self.is_ack_required() || self.is_acknowledged())
    }

    pub fn is_open(&self) -> bool {
        !self.is_closed()
    }

    /// Unacknowledged and still waiting for one
    pub fn awaiting_ack(&self) -> bool {
        self.is_ack_required() && !self.is_acknowledged()
    }

    /// Set the acknowledgement once. Returns false when already acknowledged.
    pub fn acknowledge(&mut self, user: &str, at: DateTime<Utc>) -> bool {
        if self.ack_time.is_some() {
            return false;
        }
        self.ack_time = Some(record_time(at));
        self.ack_user = Some(user.to_string());
        true
    }

    /// Set the normal time once. Returns false when already normal.
    pub fn return_to_normal(&mut self, at: DateTime<Utc>) -> bool {
        if self.normal_time.is_some() {
            return false;
        }
        self.normal_time = Some(record_time(at));
        true
    }
}

/// Operator note attached to a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub alarm_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub text: String,
}

// ============================================================================
// QUERY FILTERS
// ============================================================================

/// Acknowledgement filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AckFilter {
    Acked,
    Unacked,
    #[default]
    Any,
}

impl AckFilter {
    pub fn matches(&self, record: &AlarmRecord) -> bool {
        match self {
            AckFilter::Acked => record.is_acknowledged(),
            AckFilter::Unacked => !record.is_acknowledged(),
            AckFilter::Any => true,
        }
    }
}

impl FromStr for AckFilter {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "acked" => Ok(AckFilter::Acked),
            "unacked" => Ok(AckFilter::Unacked),
            "any" | "" => Ok(AckFilter::Any),
            other => Err(AlarmError::InvalidParameter(format!("ack filter '{}'", other))),
        }
    }
}

/// Alarm/normal filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlarmFilter {
    /// Not yet returned to normal
    Alarm,
    Normal,
    #[default]
    Any,
}

impl AlarmFilter {
    pub fn matches(&self, record: &AlarmRecord) -> bool {
        match self {
            AlarmFilter::Alarm => !record.is_normal(),
            AlarmFilter::Normal => record.is_normal(),
            AlarmFilter::Any => true,
        }
    }
}

impl FromStr for AlarmFilter {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "alarm" => Ok(AlarmFilter::Alarm),
            "normal" => Ok(AlarmFilter::Normal),
            "any" | "" => Ok(AlarmFilter::Any),
            other => Err(AlarmError::InvalidParameter(format!("alarm filter '{}'", other))),
        }
    }
}

/// Open/closed filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenFilter {
    Open,
    Closed,
    #[default]
    Any,
}

impl OpenFilter {
    pub fn matches(&self, record: &AlarmRecord) -> bool {
        match self {
            OpenFilter::Open => record.is_open(),
            OpenFilter::Closed => record.is_closed(),
            OpenFilter::Any => true,
        }
    }
}

impl FromStr for OpenFilter {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(OpenFilter::Open),
            "closed" => Ok(OpenFilter::Closed),
            "any" | "" => Ok(OpenFilter::Any),
            other => Err(AlarmError::InvalidParameter(format!("open filter '{}'", other))),
        }
    }
}

/// Sortable record columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortColumn {
    #[default]
    CreatedTime,
    SourcePath,
    AlarmClass,
    AlarmType,
    NormalTime,
    AckTime,
    AckUser,
}

impl SortColumn {
    pub const ALL: [SortColumn; 7] = [
        SortColumn::CreatedTime,
        SortColumn::SourcePath,
        SortColumn::AlarmClass,
        SortColumn::AlarmType,
        SortColumn::NormalTime,
        SortColumn::AckTime,
        SortColumn::AckUser,
    ];

    /// Display name used by hosts
    pub fn label(&self) -> &'static str {
        match self {
            SortColumn::CreatedTime => "Created Time",
            SortColumn::SourcePath => "Source Path",
            SortColumn::AlarmClass => "Alarm Class",
            SortColumn::AlarmType => "Alarm Type",
            SortColumn::NormalTime => "Normal Time",
            SortColumn::AckTime => "Ack Time",
            SortColumn::AckUser => "Ack User",
        }
    }

    /// Compare two records on this column, ascending.
    ///
    /// Unset timestamps and users sort first, the way a SQL NULL does.
    pub fn compare(&self, a: &AlarmRecord, b: &AlarmRecord) -> Ordering {
        match self {
            SortColumn::CreatedTime => a.created_time.cmp(&b.created_time),
            SortColumn::SourcePath => a.source_path.cmp(&b.source_path),
            SortColumn::AlarmClass => a.alarm_class.cmp(&b.alarm_class),
            SortColumn::AlarmType => a.alarm_type.as_str().cmp(b.alarm_type.as_str()),
            SortColumn::NormalTime => a.normal_time.cmp(&b.normal_time),
            SortColumn::AckTime => a.ack_time.cmp(&b.ack_time),
            SortColumn::AckUser => a.ack_user.cmp(&b.ack_user),
        }
    }
}

impl FromStr for SortColumn {
    type Err = AlarmError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted: String = s.chars().filter(|c| !c.is_whitespace() && *c != '_').collect();
        if wanted.eq_ignore_ascii_case("severity") {
            return Ok(SortColumn::AlarmType);
        }
        SortColumn::ALL
            .iter()
            .copied()
            .find(|col| col.label().replace(' ', "").eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| AlarmError::InvalidParameter(format!("sort column '{}'", s)))
    }
}

// ============================================================================
// RESULT ROWS
// ============================================================================

/// Fixed column set returned by every record query action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRow {
    pub id: Uuid,
    pub source_path: String,
    pub alarm_class: String,
    pub created_time: DateTime<Utc>,
    pub normal_time: Option<DateTime<Utc>>,
    pub ack_time: Option<DateTime<Utc>>,
    pub alarm_type: AlarmState,
    pub ack_user: Option<String>,
    pub message: String,
    pub has_notes: bool,
    /// Tree path of the raising watch, if it still exists
    pub watch_path: Option<String>,
    pub is_normal: bool,
    pub is_acknowledged: bool,
}

impl AlarmRow {
    pub const COLUMNS: [&'static str; 13] = [
        "UUID",
        "Source Path",
        "Alarm Class",
        "Created Time",
        "Normal Time",
        "Ack Time",
        "Alarm Type",
        "Ack User",
        "Message",
        "Has Notes",
        "Watch Path",
        "Is Normal",
        "Is Acknowledged",
    ];

    pub fn new(record: &AlarmRecord, watch_path: Option<String>) -> Self {
        Self {
            id: record.id,
            source_path: record.source_path.clone(),
            alarm_class: record.alarm_class.clone(),
            created_time: record.created_time,
            normal_time: record.normal_time,
            ack_time: record.ack_time,
            alarm_type: record.alarm_type,
            ack_user: record.ack_user.clone(),
            message: record.message.clone(),
            has_notes: record.has_notes,
            watch_path,
            is_normal: record.is_normal(),
            is_acknowledged: record.is_acknowledged(),
        }
    }
}
