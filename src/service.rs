// src/service.rs - Root alarm service: record creation, reconciliation, tick and counts
use crate::class::AlarmClass;
use crate::engine::{Engine, Handle};
use crate::error::{AlarmError, Result};
use crate::listeners::ListenerSet;
use crate::provider::{AlarmQuery, Cursor};
use crate::record::{AlarmRecord, AlarmState};
use crate::timer::PeriodicTask;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Period of the housekeeping tick
pub const TICK_PERIOD: std::time::Duration = std::time::Duration::from_secs(10);
/// Minimum spacing of unforced count recomputations
pub const COUNT_INTERVAL_SECS: i64 = 30;

/// Aggregate record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlarmCounts {
    /// Records not yet returned to normal
    pub in_alarm: u64,
    pub open: u64,
    pub total: u64,
    /// Records awaiting a required acknowledgement
    pub unacked: u64,
}

impl AlarmCounts {
    pub fn tally(&mut self, record: &AlarmRecord) {
        self.total += 1;
        if !record.is_normal() {
            self.in_alarm += 1;
        }
        if record.is_open() {
            self.open += 1;
        }
        if record.awaiting_ack() {
            self.unacked += 1;
        }
    }
}

/// Clears the tick reentrancy flag
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// State owned by the service root
#[derive(Debug)]
pub struct AlarmService {
    enabled: AtomicBool,
    id_lock: Mutex<Option<Uuid>>,
    open_alarms: Arc<ListenerSet>,
    ticking: AtomicBool,
    tick: tokio::sync::Mutex<Option<PeriodicTask>>,
    counts: Mutex<AlarmCounts>,
    counts_dirty: AtomicBool,
    last_counts: Mutex<DateTime<Utc>>,
}

impl AlarmService {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            id_lock: Mutex::new(None),
            open_alarms: Arc::new(ListenerSet::new("open alarms")),
            ticking: AtomicBool::new(false),
            tick: tokio::sync::Mutex::new(None),
            counts: Mutex::new(AlarmCounts::default()),
            counts_dirty: AtomicBool::new(true),
            last_counts: Mutex::new(now - Duration::seconds(COUNT_INTERVAL_SECS)),
        }
    }

    /// Gates all evaluation
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn counts(&self) -> AlarmCounts {
        *self.counts.lock()
    }

    pub fn open_alarm_listeners(&self) -> &Arc<ListenerSet> {
        &self.open_alarms
    }

    pub fn notify_open_alarm(&self, record: &AlarmRecord) {
        self.open_alarms.notify(record);
    }

    pub fn is_counts_dirty(&self) -> bool {
        self.counts_dirty.load(Ordering::Acquire)
    }

    /// A record id that has not been handed out before
    fn next_id(&self) -> Uuid {
        let mut last = self.id_lock.lock();
        let mut id = Uuid::new_v4();
        while Some(id) == *last {
            id = Uuid::new_v4();
        }
        *last = Some(id);
        id
    }
}

impl Engine {
    pub fn mark_counts_dirty(&self) {
        self.service().counts_dirty.store(true, Ordering::Release);
    }

    /// Create and store a new record in `class`
    pub async fn create_alarm(
        &self,
        class: &AlarmClass,
        watch: Option<Handle>,
        source_path: &str,
        severity: AlarmState,
        message: &str,
    ) -> Result<AlarmRecord> {
        if !self.is_steady() {
            return Err(AlarmError::NotSteady);
        }
        if severity == AlarmState::Normal {
            return Err(AlarmError::InvalidParameter("alarm type cannot be Normal".to_string()));
        }
        let id = self.service().next_id();
        let record = AlarmRecord::new(id, class.name(), watch, source_path, severity, message, self.now());
        self.provider().add_alarm(&record).await?;
        self.mark_counts_dirty();
        Ok(record)
    }

    /// Reconcile watch state with the open records in the store.
    ///
    /// A watch whose newest transition was not persisted adopts its open
    /// record. When a watch and the store disagree, the older of the two
    /// open records is deleted. Watches left with no open record go Normal.
    pub async fn sync_watches_to_database(&self) -> Result<()> {
        let mut unlinked: HashSet<Handle> = self.all_watches().iter().map(|w| w.handle()).collect();
        let mut stale: Vec<Uuid> = Vec::new();
        let mut cursor = self.provider().query_open_alarms(None).await?;
        while cursor.next().await? {
            let Some(record) = cursor.current().cloned() else { continue };
            let Some(handle) = record.watch else { continue };
            let Ok(watch) = self.watch(handle) else { continue };
            if record.is_normal() {
                continue;
            }
            let severity = self.algorithm(watch.algorithm()).map(|a| a.severity()).ok();
            match watch.last_alarm() {
                None => {
                    debug!("Watch {} adopts open record {}", watch.name(), record.id);
                    watch.set_last_alarm(Some(record.id));
                    if let Some(severity) = severity {
                        watch.set_alarm_state(severity, self.now());
                    }
                }
                Some(last) if last != record.id => {
                    let previous = self.provider().get_alarm(last).await?;
                    match previous {
                        Some(prev) if prev.created_time > record.created_time => stale.push(record.id),
                        other => {
                            if other.map_or(false, |prev| !prev.is_normal()) {
                                stale.push(last);
                            }
                            watch.set_last_alarm(Some(record.id));
                            if let Some(severity) = severity {
                                watch.set_alarm_state(severity, self.now());
                            }
                        }
                    }
                }
                Some(_) => {}
            }
            unlinked.remove(&handle);
        }
        cursor.close().await;

        for id in stale {
            info!("Deleting stale open record {}", id);
            match self.provider().delete_record(id).await {
                Ok(()) => self.mark_counts_dirty(),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        let now = self.now();
        for handle in unlinked {
            if let Ok(watch) = self.watch(handle) {
                if watch.alarm_state() != AlarmState::Normal {
                    debug!("Watch {} has no open record, resetting to normal", watch.name());
                    watch.set_alarm_state(AlarmState::Normal, now);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Housekeeping tick
    // ------------------------------------------------------------------

    pub(crate) async fn start_service_tick(&self) {
        let mut tick = self.service().tick.lock().await;
        if tick.is_some() {
            return;
        }
        let weak = self.downgrade();
        *tick = Some(PeriodicTask::spawn("alarm service tick", TICK_PERIOD, TICK_PERIOD, move || {
            let weak = weak.clone();
            async move {
                if let Some(engine) = weak.upgrade() {
                    engine.execute_tick().await;
                }
            }
        }));
    }

    pub(crate) async fn stop_service_tick(&self) {
        if let Some(task) = self.service().tick.lock().await.take() {
            task.stop().await;
        }
    }

    /// One housekeeping pass over every class. Skipped while a previous pass runs.
    pub async fn execute_tick(&self) {
        if !self.is_steady() {
            return;
        }
        let service = self.service();
        if service
            .ticking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Alarm service tick still running, skipping");
            return;
        }
        let _guard = TickGuard(&service.ticking);
        for class in self.classes() {
            class.execute(self).await;
        }
        if let Err(e) = self.update_counts(false).await {
            error!("Updating alarm counts failed: {}", e);
        }
    }

    /// Recompute counts with one scan of the store.
    ///
    /// Unless forced, only runs when something changed and the last run is
    /// at least 30 seconds old.
    pub async fn update_counts(&self, force: bool) -> Result<bool> {
        let service = self.service();
        let now = self.now();
        if !force {
            if !service.is_counts_dirty() {
                return Ok(false);
            }
            if now - *service.last_counts.lock() < Duration::seconds(COUNT_INTERVAL_SECS) {
                return Ok(false);
            }
        }
        service.counts_dirty.store(false, Ordering::Release);
        *service.last_counts.lock() = now;

        let mut per_class: HashMap<String, AlarmCounts> = HashMap::new();
        let mut total = AlarmCounts::default();
        let mut cursor = match self.provider().query_alarms(&AlarmQuery::all()).await {
            Ok(cursor) => cursor,
            Err(e) => {
                service.counts_dirty.store(true, Ordering::Release);
                return Err(e);
            }
        };
        loop {
            match cursor.next().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    service.counts_dirty.store(true, Ordering::Release);
                    return Err(e);
                }
            }
            if let Some(record) = cursor.current() {
                total.tally(record);
                per_class.entry(record.alarm_class.clone()).or_default().tally(record);
            }
        }
        cursor.close().await;

        for class in self.classes() {
            class.set_counts(per_class.get(class.name()).copied().unwrap_or_default());
        }
        *service.counts.lock() = total;
        debug!("Alarm counts: {:?}", total);
        Ok(true)
    }
}
