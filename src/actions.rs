// src/actions.rs - Operations the host invokes on the engine
//
// Every action returns `OperationFailed` carrying the cause, so a host can
// render failures uniformly. Record ids arrive as text.

use crate::algorithm::{Algorithm, AlgorithmKind, AlgorithmSettings};
use crate::class::{AlarmClass, ClassSettings};
use crate::engine::{Engine, Handle, Node};
use crate::error::{AlarmError, OperationExt, Result};
use crate::logging::{self, LogLevel};
use crate::provider::{collect, page_count, AlarmQuery, Cursor};
use crate::record::{AlarmRecord, AlarmRow, AlarmState, Note};
use crate::service::AlarmCounts;
use crate::streamer::{AlarmStream, Streamer};
use crate::watch::Watch;
use chrono::{DateTime, Local, TimeZone, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Rows per page when the host does not ask for a size
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Parse a record id supplied by the host
pub fn parse_id(id: &str) -> Result<Uuid> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AlarmError::InvalidParameter("missing UUID".to_string()));
    }
    Uuid::parse_str(id).map_err(|_| AlarmError::InvalidParameter(format!("invalid UUID '{}'", id)))
}

/// Parse a comma separated id list; any bad entry rejects the whole list
pub fn parse_id_list(ids: &str) -> Result<Vec<Uuid>> {
    let parsed = ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_id)
        .collect::<Result<Vec<_>>>()?;
    if parsed.is_empty() {
        return Err(AlarmError::InvalidParameter("missing UUID".to_string()));
    }
    Ok(parsed)
}

/// Render query rows as a JSON array for hosts that forward results as text
pub fn rows_to_json(rows: &[AlarmRow]) -> Result<String> {
    Ok(serde_json::to_string_pretty(rows)?)
}

/// The acting user; blank names are rejected
pub fn parse_user(user: &str) -> Result<&str> {
    let user = user.trim();
    if user.is_empty() {
        return Err(AlarmError::InvalidParameter("missing user".to_string()));
    }
    Ok(user)
}

/// Local midnight of the day containing `now`
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or(now)
}

impl Engine {
    // ------------------------------------------------------------------
    // Tree
    // ------------------------------------------------------------------

    pub async fn create_alarm_class(&self, name: &str) -> Result<Arc<AlarmClass>> {
        self.add_class(name, ClassSettings::default())
            .await
            .operation("create alarm class")
    }

    /// Create an algorithm by catalog type name with default parameters
    pub async fn create_algorithm(&self, class: Handle, name: &str, type_name: &str) -> Result<Arc<Algorithm>> {
        async {
            let kind: AlgorithmKind = type_name.parse()?;
            self.add_algorithm(class, name, AlgorithmSettings::default(), kind.default_config())
                .await
        }
        .await
        .operation("create algorithm")
    }

    pub async fn create_watch(&self, algorithm: Handle, name: &str, source_path: &str) -> Result<Arc<Watch>> {
        self.add_watch(algorithm, name, source_path)
            .await
            .operation("create watch")
    }

    /// Delete any tree node by handle
    pub async fn delete_node(&self, handle: Handle) -> Result<()> {
        let result = match self.get_by_handle(handle) {
            Some(Node::Class(_)) => self.delete_class(handle).await,
            Some(Node::Algorithm(_)) => self.delete_algorithm(handle).await,
            Some(Node::Watch(_)) => self.delete_watch(handle).await,
            None => Err(AlarmError::NotFound(format!("handle {}", handle))),
        };
        result.operation("delete")
    }

    /// Type names the provider offers
    pub fn algorithm_catalog(&self) -> Vec<&'static str> {
        self.provider()
            .algorithm_catalog()
            .iter()
            .map(AlgorithmKind::type_name)
            .collect()
    }

    pub async fn update_all_action(&self, algorithm: Handle) -> Result<()> {
        self.update_all(algorithm).await.operation("update all")
    }

    // ------------------------------------------------------------------
    // Record mutation
    // ------------------------------------------------------------------

    /// Raise an alarm from the host with no watch behind it
    pub async fn raise_alarm(
        &self,
        class: Handle,
        source_path: &str,
        severity: &str,
        message: &str,
    ) -> Result<AlarmRecord> {
        async {
            let class = self.class(class)?;
            if source_path.trim().is_empty() {
                return Err(AlarmError::InvalidParameter("missing source path".to_string()));
            }
            let severity = AlarmState::alarm_severity(severity)?;
            let record = self
                .create_alarm(&class, None, source_path.trim(), severity, message)
                .await?;
            info!("Alarm raised: {} ({})", record.source_path, record.message);
            class.notify_new_record(&record);
            class.notify_all_updates(self, &record);
            Ok(record)
        }
        .await
        .operation("create alarm")
    }

    /// Re-read a record after a change and push it to its class listeners
    async fn publish_update(&self, id: Uuid) -> Result<()> {
        self.mark_counts_dirty();
        if let Some(record) = self.provider().get_alarm(id).await? {
            match self.class_by_name(&record.alarm_class) {
                Some(class) => class.notify_all_updates(self, &record),
                None => self.service().notify_open_alarm(&record),
            }
        }
        Ok(())
    }

    async fn acknowledge_one(&self, id: Uuid, user: &str) -> Result<()> {
        self.provider().acknowledge(id, user, self.now()).await?;
        self.publish_update(id).await
    }

    /// Acknowledge a comma separated list of record ids
    pub async fn acknowledge(&self, ids: &str, user: &str) -> Result<usize> {
        async {
            let user = parse_user(user)?;
            let ids = parse_id_list(ids)?;
            for id in &ids {
                self.acknowledge_one(*id, user).await?;
            }
            Ok::<_, AlarmError>(ids.len())
        }
        .await
        .operation("acknowledge")
    }

    /// Acknowledge every open record that is waiting for one
    pub async fn acknowledge_all(&self, user: &str) -> Result<usize> {
        async { self.acknowledge_open(None, parse_user(user)?).await }
            .await
            .operation("acknowledge all")
    }

    /// Acknowledge every open record of one class
    pub async fn acknowledge_all_open(&self, class: Handle, user: &str) -> Result<usize> {
        async {
            let user = parse_user(user)?;
            let class = self.class(class)?;
            self.acknowledge_open(Some(class.name()), user).await
        }
        .await
        .operation("acknowledge all open")
    }

    async fn acknowledge_open(&self, class: Option<&str>, user: &str) -> Result<usize> {
        let open = collect(self.provider().query_open_alarms(class).await?).await?;
        let mut count = 0;
        for record in open.iter().filter(|r| r.awaiting_ack()) {
            match self.acknowledge_one(record.id, user).await {
                Ok(()) => count += 1,
                Err(e) if e.is_not_found() => warn!("Record {} vanished before acknowledgement", record.id),
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    pub async fn return_to_normal(&self, id: &str) -> Result<()> {
        async {
            let id = parse_id(id)?;
            self.provider().return_to_normal(id, self.now()).await?;
            self.publish_update(id).await
        }
        .await
        .operation("return to normal")
    }

    pub async fn add_note(&self, id: &str, user: &str, note: &str) -> Result<()> {
        async {
            let id = parse_id(id)?;
            let user = parse_user(user)?;
            if note.trim().is_empty() {
                return Err(AlarmError::InvalidParameter("missing note".to_string()));
            }
            self.provider().add_note(id, user, note, self.now()).await?;
            self.publish_update(id).await
        }
        .await
        .operation("add note")
    }

    pub async fn get_notes(&self, id: &str) -> Result<Vec<Note>> {
        async {
            let id = parse_id(id)?;
            collect(self.provider().get_notes(id).await?).await
        }
        .await
        .operation("get notes")
    }

    pub async fn delete_record(&self, id: &str) -> Result<()> {
        async {
            let id = parse_id(id)?;
            self.provider().delete_record(id).await?;
            self.mark_counts_dirty();
            Ok::<_, AlarmError>(())
        }
        .await
        .operation("delete record")
    }

    pub async fn delete_all_records(&self) -> Result<()> {
        self.provider()
            .delete_all_records()
            .await
            .map(|()| self.mark_counts_dirty())
            .operation("delete all records")
    }

    pub fn set_log_level(&self, level: &str) -> Result<LogLevel> {
        logging::set_log_level(level).operation("set log level")
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    fn row(&self, record: &AlarmRecord) -> AlarmRow {
        AlarmRow::new(record, record.watch.and_then(|h| self.watch_path(h)))
    }

    pub async fn get_alarm(&self, id: &str) -> Result<AlarmRow> {
        async {
            let id = parse_id(id)?;
            match self.provider().get_alarm(id).await? {
                Some(record) => Ok(self.row(&record)),
                None => Err(AlarmError::NotFound(format!("alarm {}", id))),
            }
        }
        .await
        .operation("get alarm")
    }

    /// Records created in `[from, to)`, oldest first
    pub async fn get_alarms(
        &self,
        class: Option<&str>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AlarmRow>> {
        async {
            let mut query = AlarmQuery::all().between(from, to);
            query.class = class.map(str::to_string);
            let rows = collect(self.provider().query_alarms(&query).await?).await?;
            Ok::<_, AlarmError>(rows.iter().map(|r| self.row(r)).collect())
        }
        .await
        .operation("get alarms")
    }

    /// Records of one class; the range defaults to today
    pub async fn get_class_alarms(
        &self,
        class: Handle,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AlarmRow>> {
        let class = self.class(class).operation("get alarms")?;
        let now = self.now();
        let from = from.unwrap_or_else(|| start_of_day(now));
        let to = to.unwrap_or(now + chrono::Duration::milliseconds(1));
        self.get_alarms(Some(class.name()), Some(from), Some(to)).await
    }

    /// Open records, then live updates when `stream` is set.
    ///
    /// With a class, updates come from its all-updates listeners; without
    /// one, from the service's open alarm listeners.
    pub async fn get_open_alarms(&self, class: Option<Handle>, stream: bool) -> Result<AlarmStream> {
        async {
            let class = class.map(|h| self.class(h)).transpose()?;
            let listeners = stream.then(|| match &class {
                Some(class) => class.all_update_listeners().clone(),
                None => self.service().open_alarm_listeners().clone(),
            });
            let streamer = Streamer::join(listeners);
            match self.provider().query_open_alarms(class.as_ref().map(|c| c.name())).await {
                Ok(cursor) => Ok(streamer.start(Some(cursor), self.stream_settings())),
                Err(e) => {
                    streamer.abandon();
                    Err(e)
                }
            }
        }
        .await
        .operation("get open alarms")
    }

    /// One page of filtered records, `DEFAULT_PAGE_SIZE` rows when unsized
    pub async fn get_alarm_page(
        &self,
        query: &AlarmQuery,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<Vec<AlarmRow>> {
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        async {
            let mut cursor = self.provider().query_alarms(query).await?;
            cursor.set_paging(page, page_size)?;
            let rows = collect(cursor).await?;
            Ok::<_, AlarmError>(rows.iter().map(|r| self.row(r)).collect())
        }
        .await
        .operation("get alarm page")
    }

    /// Number of pages the filtered records span
    pub async fn get_alarm_page_count(&self, query: &AlarmQuery, page_size: Option<usize>) -> Result<usize> {
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        async {
            if page_size == 0 {
                return Err(AlarmError::InvalidParameter("page size must be positive".to_string()));
            }
            let mut cursor = self.provider().query_alarms(query).await?;
            let mut rows = 0;
            while cursor.next().await? {
                rows += 1;
            }
            cursor.close().await;
            Ok(page_count(rows, page_size))
        }
        .await
        .operation("get alarm page count")
    }

    // ------------------------------------------------------------------
    // Class streams
    // ------------------------------------------------------------------

    pub fn stream_new_alarms(&self, class: Handle) -> Result<AlarmStream> {
        let class = self.class(class).operation("stream new alarms")?;
        Ok(Streamer::spawn(
            Some(class.new_alarm_listeners().clone()),
            None,
            self.stream_settings(),
        ))
    }

    /// Records as they pass escalation tier 1 or 2
    pub fn stream_escalations(&self, class: Handle, tier: u8) -> Result<AlarmStream> {
        let class = self.class(class).operation("stream escalation")?;
        let listeners = match tier {
            1 => class.escalation1_listeners().clone(),
            2 => class.escalation2_listeners().clone(),
            other => {
                return Err(AlarmError::operation(
                    "stream escalation",
                    AlarmError::InvalidParameter(format!("escalation tier {}", other)),
                ))
            }
        };
        Ok(Streamer::spawn(Some(listeners), None, self.stream_settings()))
    }

    pub fn counts(&self) -> AlarmCounts {
        self.service().counts()
    }
}
