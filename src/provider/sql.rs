// src/provider/sql.rs - SQL record store over sqlx
//
// Timestamps are stored as epoch milliseconds. A NULL (or legacy zero)
// normal/ack time reads back as unset.

use super::{AlarmCursor, AlarmQuery, Cursor, NoteCursor, Paging, Provider, VecCursor};
use crate::engine::Handle;
use crate::error::{AlarmError, Result};
use crate::record::{AckFilter, AlarmFilter, AlarmRecord, AlarmState, Note, OpenFilter, SortColumn};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// Rows pulled from the database per round trip while iterating
pub const DEFAULT_FETCH_SIZE: usize = 256;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS alarm_records (
        uuid TEXT PRIMARY KEY,
        source_path TEXT NOT NULL,
        alarm_class TEXT NOT NULL,
        watch INTEGER,
        alarm_type TEXT NOT NULL,
        created_time INTEGER NOT NULL,
        normal_time INTEGER,
        ack_time INTEGER,
        ack_user TEXT,
        message TEXT NOT NULL,
        has_notes BOOLEAN NOT NULL DEFAULT FALSE,
        is_open BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alarm_records_created ON alarm_records(created_time)",
    "CREATE INDEX IF NOT EXISTS idx_alarm_records_open ON alarm_records(is_open, alarm_class)",
    r#"
    CREATE TABLE IF NOT EXISTS alarm_notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uuid TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        note_user TEXT NOT NULL,
        note TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_alarm_notes_uuid ON alarm_notes(uuid, timestamp)",
];

const RECORD_COLUMNS: &str = "uuid, source_path, alarm_class, watch, alarm_type, created_time, \
     normal_time, ack_time, ack_user, message, has_notes";

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    uuid: String,
    source_path: String,
    alarm_class: String,
    watch: Option<i64>,
    alarm_type: String,
    created_time: i64,
    normal_time: Option<i64>,
    ack_time: Option<i64>,
    ack_user: Option<String>,
    message: String,
    has_notes: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct NoteRow {
    uuid: String,
    timestamp: i64,
    note_user: String,
    note: String,
}

fn decode_error(err: impl std::error::Error + Send + Sync + 'static) -> AlarmError {
    AlarmError::Storage(sqlx::Error::Decode(Box::new(err)))
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| AlarmError::Config(format!("timestamp out of range: {}", millis)))
}

/// NULL and zero both mean the timestamp was never set
fn optional_millis(millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    match millis {
        None | Some(0) => Ok(None),
        Some(ms) => from_millis(ms).map(Some),
    }
}

impl TryFrom<RecordRow> for AlarmRecord {
    type Error = AlarmError;

    fn try_from(row: RecordRow) -> Result<Self> {
        Ok(AlarmRecord {
            id: Uuid::parse_str(&row.uuid).map_err(decode_error)?,
            source_path: row.source_path,
            alarm_class: row.alarm_class,
            watch: row.watch.and_then(|h| Handle::try_from(h).ok()),
            alarm_type: AlarmState::from_str(&row.alarm_type)?,
            created_time: from_millis(row.created_time)?,
            normal_time: optional_millis(row.normal_time)?,
            ack_time: optional_millis(row.ack_time)?,
            ack_user: row.ack_user,
            message: row.message,
            has_notes: row.has_notes,
        })
    }
}

impl TryFrom<NoteRow> for Note {
    type Error = AlarmError;

    fn try_from(row: NoteRow) -> Result<Self> {
        Ok(Note {
            alarm_id: Uuid::parse_str(&row.uuid).map_err(decode_error)?,
            timestamp: from_millis(row.timestamp)?,
            user: row.note_user,
            text: row.note,
        })
    }
}

/// Append the WHERE clause for a query
fn push_filters(builder: &mut QueryBuilder<'static, Sqlite>, query: &AlarmQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(class) = &query.class {
        builder.push(" AND alarm_class = ").push_bind(class.clone());
    }
    if let Some(from) = query.from {
        builder.push(" AND created_time >= ").push_bind(to_millis(from));
    }
    if let Some(to) = query.to {
        builder.push(" AND created_time < ").push_bind(to_millis(to));
    }
    match query.ack {
        AckFilter::Acked => {
            builder.push(" AND ack_time IS NOT NULL AND ack_time <> 0");
        }
        AckFilter::Unacked => {
            builder.push(" AND (ack_time IS NULL OR ack_time = 0)");
        }
        AckFilter::Any => {}
    }
    match query.alarm {
        AlarmFilter::Alarm => {
            builder.push(" AND (normal_time IS NULL OR normal_time = 0)");
        }
        AlarmFilter::Normal => {
            builder.push(" AND normal_time IS NOT NULL AND normal_time <> 0");
        }
        AlarmFilter::Any => {}
    }
    if let Some(severity) = query.severity {
        builder.push(" AND alarm_type = ").push_bind(severity.as_str());
    }
    match query.open {
        OpenFilter::Open => {
            builder.push(" AND is_open");
        }
        OpenFilter::Closed => {
            builder.push(" AND NOT is_open");
        }
        OpenFilter::Any => {}
    }
}

fn sort_expression(column: SortColumn) -> &'static str {
    match column {
        SortColumn::CreatedTime => "created_time",
        SortColumn::SourcePath => "source_path",
        SortColumn::AlarmClass => "alarm_class",
        SortColumn::AlarmType => "alarm_type",
        SortColumn::NormalTime => "normal_time",
        SortColumn::AckTime => "ack_time",
        SortColumn::AckUser => "ack_user",
    }
}

/// Ordered ids matching a query, with paging applied
fn select_ids(query: &AlarmQuery, paging: Option<Paging>) -> QueryBuilder<'static, Sqlite> {
    let mut builder = QueryBuilder::new("SELECT uuid FROM alarm_records");
    push_filters(&mut builder, query);
    let direction = if query.descending { "DESC" } else { "ASC" };
    builder.push(format!(
        " ORDER BY {col} {dir}, created_time {dir}, uuid {dir}",
        col = sort_expression(query.sort_column()),
        dir = direction
    ));
    if let Some(paging) = paging {
        builder
            .push(" LIMIT ")
            .push_bind(paging.limit as i64)
            .push(" OFFSET ")
            .push_bind(paging.skip as i64);
    }
    builder
}

fn select_by_ids(ids: &[String]) -> QueryBuilder<'static, Sqlite> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM alarm_records WHERE uuid IN (", RECORD_COLUMNS));
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(")");
    builder
}

/// Provider storing records in a SQL database
///
/// `sqlite::memory:` databases must use a single connection, since every
/// pooled connection would otherwise open its own empty database.
#[derive(Debug, Clone)]
pub struct SqlProvider {
    pool: SqlitePool,
    fetch_size: usize,
}

impl SqlProvider {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let max_connections = if url.contains(":memory:") { 1 } else { max_connections.max(1) };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        info!("Connected alarm record database {}", url);
        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub async fn run_migrations(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM alarm_records WHERE uuid = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn require(&self, id: Uuid) -> Result<()> {
        if self.exists(id).await? {
            Ok(())
        } else {
            Err(AlarmError::NotFound(format!("alarm {}", id)))
        }
    }
}

#[async_trait]
impl Provider for SqlProvider {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn start(&self) -> Result<()> {
        self.run_migrations().await
    }

    async fn stop(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn add_alarm(&self, record: &AlarmRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO alarm_records (
                uuid, source_path, alarm_class, watch, alarm_type, created_time,
                normal_time, ack_time, ack_user, message, has_notes, is_open
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.source_path)
        .bind(&record.alarm_class)
        .bind(record.watch.map(i64::from))
        .bind(record.alarm_type.as_str())
        .bind(to_millis(record.created_time))
        .bind(record.normal_time.map(to_millis))
        .bind(record.ack_time.map(to_millis))
        .bind(&record.ack_user)
        .bind(&record.message)
        .bind(record.has_notes)
        .bind(record.is_open())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AlarmError::DuplicateRecord(record.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_alarm(&self, id: Uuid) -> Result<Option<AlarmRecord>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM alarm_records WHERE uuid = ?",
            RECORD_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(AlarmRecord::try_from).transpose()
    }

    async fn acknowledge(&self, id: Uuid, user: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE alarm_records
            SET ack_time = ?, ack_user = ?,
                is_open = CASE WHEN normal_time IS NULL OR normal_time = 0 THEN TRUE ELSE FALSE END
            WHERE uuid = ? AND (ack_time IS NULL OR ack_time = 0)
            "#,
        )
        .bind(to_millis(at))
        .bind(user)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            self.require(id).await?;
        }
        Ok(())
    }

    async fn return_to_normal(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE alarm_records
            SET normal_time = ?,
                is_open = CASE
                    WHEN alarm_type = 'Alert' OR (ack_time IS NOT NULL AND ack_time <> 0) THEN FALSE
                    ELSE TRUE
                END
            WHERE uuid = ? AND (normal_time IS NULL OR normal_time = 0)
            "#,
        )
        .bind(to_millis(at))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            self.require(id).await?;
        }
        Ok(())
    }

    async fn add_note(&self, id: Uuid, user: &str, text: &str, at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let flagged = sqlx::query("UPDATE alarm_records SET has_notes = TRUE WHERE uuid = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        if flagged.rows_affected() == 0 {
            return Err(AlarmError::NotFound(format!("alarm {}", id)));
        }
        sqlx::query("INSERT INTO alarm_notes (uuid, timestamp, note_user, note) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(to_millis(at))
            .bind(user)
            .bind(text)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_record(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM alarm_notes WHERE uuid = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM alarm_records WHERE uuid = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(AlarmError::NotFound(format!("alarm {}", id)));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_all_records(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM alarm_notes").execute(&mut *tx).await?;
        let deleted = sqlx::query("DELETE FROM alarm_records").execute(&mut *tx).await?;
        tx.commit().await?;
        debug!("SQL provider deleted {} records", deleted.rows_affected());
        Ok(())
    }

    async fn query_alarms(&self, query: &AlarmQuery) -> Result<AlarmCursor> {
        Ok(Box::new(SqlAlarmCursor {
            pool: self.pool.clone(),
            query: query.clone(),
            fetch_size: self.fetch_size,
            paging: None,
            ids: None,
            buffer: VecDeque::new(),
            closed: false,
            started: false,
            current: None,
        }))
    }

    async fn get_notes(&self, id: Uuid) -> Result<NoteCursor> {
        let rows: Vec<NoteRow> = sqlx::query_as(
            "SELECT uuid, timestamp, note_user, note FROM alarm_notes WHERE uuid = ? ORDER BY timestamp, id",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let notes = rows.into_iter().map(Note::try_from).collect::<Result<Vec<_>>>()?;
        Ok(Box::new(VecCursor::new(notes)))
    }
}

// ============================================================================
// CURSOR
// ============================================================================

/// Cursor over the id set matched when iteration starts
///
/// Rows are then loaded by id in `fetch_size` batches, so records changed
/// while the cursor is open are neither skipped nor repeated. A record
/// deleted before its batch is loaded is left out.
struct SqlAlarmCursor {
    pool: SqlitePool,
    query: AlarmQuery,
    fetch_size: usize,
    paging: Option<Paging>,
    ids: Option<VecDeque<String>>,
    buffer: VecDeque<AlarmRecord>,
    closed: bool,
    started: bool,
    current: Option<AlarmRecord>,
}

impl SqlAlarmCursor {
    async fn load_ids(&mut self) -> Result<()> {
        let ids: Vec<(String,)> = select_ids(&self.query, self.paging)
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;
        trace!("SQL cursor matched {} records", ids.len());
        self.ids = Some(ids.into_iter().map(|(id,)| id).collect());
        Ok(())
    }

    /// Load the next batch that still has rows, if any ids remain
    async fn fill(&mut self) -> Result<()> {
        if self.ids.is_none() {
            self.load_ids().await?;
        }
        while self.buffer.is_empty() {
            let batch: Vec<String> = match self.ids.as_mut() {
                Some(ids) if !ids.is_empty() => {
                    let take = self.fetch_size.min(ids.len());
                    ids.drain(..take).collect()
                }
                _ => return Ok(()),
            };
            let rows: Vec<RecordRow> = select_by_ids(&batch)
                .build_query_as()
                .fetch_all(&self.pool)
                .await?;
            let mut by_id: HashMap<String, RecordRow> =
                rows.into_iter().map(|row| (row.uuid.clone(), row)).collect();
            for id in &batch {
                if let Some(row) = by_id.remove(id) {
                    self.buffer.push_back(AlarmRecord::try_from(row)?);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Cursor<AlarmRecord> for SqlAlarmCursor {
    fn set_paging(&mut self, page: usize, page_size: usize) -> Result<()> {
        if self.started {
            return Err(AlarmError::InvalidParameter("cursor already in use".to_string()));
        }
        self.paging = Some(Paging::new(page, page_size)?);
        Ok(())
    }

    async fn next(&mut self) -> Result<bool> {
        self.started = true;
        if self.buffer.is_empty() && !self.closed {
            self.fill().await?;
        }
        self.current = self.buffer.pop_front();
        Ok(self.current.is_some())
    }

    fn current(&self) -> Option<&AlarmRecord> {
        self.current.as_ref()
    }

    async fn close(&mut self) {
        self.closed = true;
        self.ids = None;
        self.buffer.clear();
        self.current = None;
    }
}
