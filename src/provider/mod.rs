// src/provider/mod.rs - Record storage abstraction
//
// A provider stores alarm records and their notes. Every operation takes
// explicit timestamps from the engine clock so that both backends agree on
// time and tests can drive it.

use crate::algorithm::AlgorithmKind;
use crate::error::{AlarmError, Result};
use crate::record::{
    record_time, AckFilter, AlarmFilter, AlarmRecord, AlarmState, Note, OpenFilter, SortColumn,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod memory;
#[cfg(feature = "sql-storage")]
pub mod sql;

pub use memory::MemoryProvider;
#[cfg(feature = "sql-storage")]
pub use sql::SqlProvider;

// ============================================================================
// CURSORS
// ============================================================================

/// Forward-only iterator over query results
///
/// A cursor starts before the first row. `current` is `None` until `next`
/// has returned `true`. Dropping a cursor releases it; `close` does the same
/// explicitly.
#[async_trait]
pub trait Cursor<T: Send + Sync>: Send {
    /// Skip `page * page_size` rows and yield at most `page_size`.
    ///
    /// Only allowed before the first call to `next`.
    fn set_paging(&mut self, page: usize, page_size: usize) -> Result<()>;

    /// Advance to the next row, returning whether one is available
    async fn next(&mut self) -> Result<bool>;

    /// The row the cursor is positioned on
    fn current(&self) -> Option<&T>;

    /// Release the cursor early
    async fn close(&mut self) {}
}

pub type AlarmCursor = Box<dyn Cursor<AlarmRecord>>;
pub type NoteCursor = Box<dyn Cursor<Note>>;

/// Drain a cursor into a vector, closing it afterwards
pub async fn collect<T: Clone + Send + Sync + 'static>(mut cursor: Box<dyn Cursor<T>>) -> Result<Vec<T>> {
    let mut rows = Vec::new();
    while cursor.next().await? {
        if let Some(row) = cursor.current() {
            rows.push(row.clone());
        }
    }
    cursor.close().await;
    Ok(rows)
}

/// Row window requested through `set_paging`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub skip: usize,
    pub limit: usize,
}

impl Paging {
    pub fn new(page: usize, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(AlarmError::InvalidParameter("page size must be > 0".to_string()));
        }
        Ok(Self {
            skip: page.saturating_mul(page_size),
            limit: page_size,
        })
    }
}

/// Number of pages needed for `rows` at `page_size`
pub fn page_count(rows: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    rows.div_ceil(page_size)
}

/// Cursor over rows that were already materialized
pub struct VecCursor<T> {
    rows: std::vec::IntoIter<T>,
    paging: Option<Paging>,
    started: bool,
    current: Option<T>,
}

impl<T> VecCursor<T> {
    pub fn new(rows: Vec<T>) -> Self {
        Self {
            rows: rows.into_iter(),
            paging: None,
            started: false,
            current: None,
        }
    }
}

#[async_trait]
impl<T: Send + Sync> Cursor<T> for VecCursor<T> {
    fn set_paging(&mut self, page: usize, page_size: usize) -> Result<()> {
        if self.started {
            return Err(AlarmError::InvalidParameter("cursor already in use".to_string()));
        }
        self.paging = Some(Paging::new(page, page_size)?);
        Ok(())
    }

    async fn next(&mut self) -> Result<bool> {
        if !self.started {
            self.started = true;
            if let Some(paging) = self.paging {
                let rest: Vec<T> = std::mem::take(&mut self.rows)
                    .skip(paging.skip)
                    .take(paging.limit)
                    .collect();
                self.rows = rest.into_iter();
            }
        }
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    async fn close(&mut self) {
        self.rows = Vec::new().into_iter();
        self.current = None;
    }
}

// ============================================================================
// QUERIES
// ============================================================================

/// Record selection shared by both backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmQuery {
    /// Class name; `None` selects every class
    pub class: Option<String>,
    /// Inclusive lower bound on created time
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on created time
    pub to: Option<DateTime<Utc>>,
    pub ack: AckFilter,
    pub alarm: AlarmFilter,
    pub severity: Option<AlarmState>,
    pub open: OpenFilter,
    /// Created time when unset
    pub sort: Option<SortColumn>,
    pub descending: bool,
}

impl AlarmQuery {
    pub fn all() -> Self {
        Self::default()
    }

    /// Open records, optionally restricted to one class
    pub fn open(class: Option<&str>) -> Self {
        Self {
            class: class.map(str::to_string),
            open: OpenFilter::Open,
            ..Self::default()
        }
    }

    pub fn for_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn sorted_by(mut self, column: SortColumn, ascending: bool) -> Self {
        self.sort = Some(column);
        self.descending = !ascending;
        self
    }

    pub fn sort_column(&self) -> SortColumn {
        self.sort.unwrap_or_default()
    }

    /// Whether results come back in plain created-time ascending order
    pub fn is_natural_order(&self) -> bool {
        self.sort_column() == SortColumn::CreatedTime && !self.descending
    }

    pub fn in_range(&self, created: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| created >= record_time(from))
            && self.to.map_or(true, |to| created < record_time(to))
    }

    pub fn matches(&self, record: &AlarmRecord) -> bool {
        self.class.as_deref().map_or(true, |c| c == record.alarm_class)
            && self.in_range(record.created_time)
            && self.ack.matches(record)
            && self.alarm.matches(record)
            && self.severity.map_or(true, |s| s == record.alarm_type)
            && self.open.matches(record)
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Alarm record store
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Prepare the backing store (schema, connections)
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Insert a new record; fails if the id already exists
    async fn add_alarm(&self, record: &AlarmRecord) -> Result<()>;

    async fn get_alarm(&self, id: Uuid) -> Result<Option<AlarmRecord>>;

    /// Set ack time and user unless already acknowledged
    async fn acknowledge(&self, id: Uuid, user: &str, at: DateTime<Utc>) -> Result<()>;

    /// Set normal time unless already normal
    async fn return_to_normal(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Append a note and flag the record as having notes
    async fn add_note(&self, id: Uuid, user: &str, text: &str, at: DateTime<Utc>) -> Result<()>;

    async fn delete_record(&self, id: Uuid) -> Result<()>;

    async fn delete_all_records(&self) -> Result<()>;

    async fn query_alarms(&self, query: &AlarmQuery) -> Result<AlarmCursor>;

    async fn query_open_alarms(&self, class: Option<&str>) -> Result<AlarmCursor> {
        self.query_alarms(&AlarmQuery::open(class)).await
    }

    /// Notes of a record, oldest first
    async fn get_notes(&self, id: Uuid) -> Result<NoteCursor>;

    /// Algorithm types this provider offers
    fn algorithm_catalog(&self) -> Vec<AlgorithmKind> {
        AlgorithmKind::ALL.to_vec()
    }
}
