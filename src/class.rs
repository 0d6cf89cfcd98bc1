// src/class.rs - Alarm classes: escalation, purge and listener fan-out
use crate::engine::{Engine, Handle, Lifecycle, LifecycleCell};
use crate::error::Result;
use crate::listeners::ListenerSet;
use crate::provider::{AlarmQuery, Cursor};
use crate::record::{AlarmRecord, OpenFilter};
use crate::service::AlarmCounts;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often auto-purge scans the store
const PURGE_INTERVAL_MINUTES: i64 = 60;
/// Deletions between yields during a purge
const PURGE_YIELD_EVERY: usize = 100;

/// Offset used by an escalation tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTier {
    #[serde(default)]
    pub days: u32,
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
}

impl EscalationTier {
    pub fn new(days: u32, hours: u32, minutes: u32) -> Self {
        Self { days, hours, minutes }
    }

    pub fn duration(&self) -> Duration {
        Duration::days(self.days as i64) + Duration::hours(self.hours as i64) + Duration::minutes(self.minutes as i64)
    }

    pub fn is_set(&self) -> bool {
        self.duration() > Duration::zero()
    }
}

/// What the second escalation tier is measured from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationBasis {
    /// Tier 2 fires its offset after tier 1
    #[default]
    FromTier1,
    /// Tier 2 fires its offset after creation
    FromCreation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub escalation1: EscalationTier,
    #[serde(default)]
    pub escalation2: EscalationTier,
    #[serde(default)]
    pub escalation_basis: EscalationBasis,
    /// Days to keep closed records, 0 keeps them forever
    #[serde(default)]
    pub purge_closed_days: u32,
    /// Days to keep open records, 0 keeps them forever
    #[serde(default)]
    pub purge_open_days: u32,
}

fn default_enabled() -> bool {
    true
}

impl Default for ClassSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            escalation1: EscalationTier::default(),
            escalation2: EscalationTier::default(),
            escalation_basis: EscalationBasis::default(),
            purge_closed_days: 0,
            purge_open_days: 0,
        }
    }
}

impl ClassSettings {
    pub fn tier1_at(&self, created: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.escalation1.is_set().then(|| created + self.escalation1.duration())
    }

    pub fn tier2_at(&self, created: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.escalation2.is_set() {
            return None;
        }
        let base = match self.escalation_basis {
            EscalationBasis::FromTier1 => created + self.escalation1.duration(),
            EscalationBasis::FromCreation => created,
        };
        Some(base + self.escalation2.duration())
    }
}

/// A group of algorithms sharing escalation, purge and listeners
#[derive(Debug)]
pub struct AlarmClass {
    handle: Handle,
    name: String,
    settings: RwLock<ClassSettings>,
    algorithms: RwLock<Vec<Handle>>,
    new_alarm: Arc<ListenerSet>,
    all_updates: Arc<ListenerSet>,
    escalation1: Arc<ListenerSet>,
    escalation2: Arc<ListenerSet>,
    counts: Mutex<AlarmCounts>,
    last_escalation_check: Mutex<DateTime<Utc>>,
    last_purge: Mutex<Option<DateTime<Utc>>>,
    lifecycle: LifecycleCell,
}

impl AlarmClass {
    pub fn new(handle: Handle, name: impl Into<String>, settings: ClassSettings, now: DateTime<Utc>) -> Self {
        Self {
            handle,
            name: name.into(),
            settings: RwLock::new(settings),
            algorithms: RwLock::new(Vec::new()),
            new_alarm: Arc::new(ListenerSet::new("new alarms")),
            all_updates: Arc::new(ListenerSet::new("all updates")),
            escalation1: Arc::new(ListenerSet::new("escalation 1")),
            escalation2: Arc::new(ListenerSet::new("escalation 2")),
            counts: Mutex::new(AlarmCounts::default()),
            last_escalation_check: Mutex::new(now),
            last_purge: Mutex::new(None),
            lifecycle: LifecycleCell::default(),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> ClassSettings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: ClassSettings) {
        *self.settings.write() = settings;
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.read().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.settings.write().enabled = enabled;
    }

    pub fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    pub fn is_steady(&self) -> bool {
        self.lifecycle.get() == Lifecycle::Steady
    }

    pub fn algorithms(&self) -> Vec<Handle> {
        self.algorithms.read().clone()
    }

    pub(crate) fn add_algorithm(&self, handle: Handle) {
        self.algorithms.write().push(handle);
    }

    pub(crate) fn remove_algorithm(&self, handle: Handle) {
        self.algorithms.write().retain(|h| *h != handle);
    }

    pub fn counts(&self) -> AlarmCounts {
        *self.counts.lock()
    }

    pub(crate) fn set_counts(&self, counts: AlarmCounts) {
        *self.counts.lock() = counts;
    }

    pub fn new_alarm_listeners(&self) -> &Arc<ListenerSet> {
        &self.new_alarm
    }

    pub fn all_update_listeners(&self) -> &Arc<ListenerSet> {
        &self.all_updates
    }

    pub fn escalation1_listeners(&self) -> &Arc<ListenerSet> {
        &self.escalation1
    }

    pub fn escalation2_listeners(&self) -> &Arc<ListenerSet> {
        &self.escalation2
    }

    pub(crate) fn close_listeners(&self) {
        self.new_alarm.close_all();
        self.all_updates.close_all();
        self.escalation1.close_all();
        self.escalation2.close_all();
    }

    pub fn notify_new_record(&self, record: &AlarmRecord) {
        self.new_alarm.notify(record);
    }

    /// Notify update listeners and the service's open alarm streams
    pub fn notify_all_updates(&self, engine: &Engine, record: &AlarmRecord) {
        self.all_updates.notify(record);
        engine.service().notify_open_alarm(record);
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    /// Run on every service tick
    pub async fn execute(&self, engine: &Engine) {
        if self.is_enabled() && engine.service().is_enabled() {
            for algorithm in engine.algorithms_of(self) {
                algorithm.execute(engine).await;
            }
            self.check_escalations(engine).await;
        }
        self.check_auto_purge(engine).await;
    }

    /// Notify escalation listeners of records whose tier time passed since the last check.
    ///
    /// The watermark advances even when the scan fails.
    pub async fn check_escalations(&self, engine: &Engine) {
        let now = engine.now();
        let since = {
            let mut last = self.last_escalation_check.lock();
            std::mem::replace(&mut *last, now)
        };
        let settings = self.settings();
        let tier1 = settings.escalation1.is_set() && !self.escalation1.is_empty();
        let tier2 = settings.escalation2.is_set() && !self.escalation2.is_empty();
        if !tier1 && !tier2 {
            return;
        }
        if let Err(e) = self.scan_escalations(engine, &settings, since, now, tier1, tier2).await {
            error!("Escalation check of {} failed: {}", self.name, e);
        }
    }

    async fn scan_escalations(
        &self,
        engine: &Engine,
        settings: &ClassSettings,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        tier1: bool,
        tier2: bool,
    ) -> Result<()> {
        let due = |at: Option<DateTime<Utc>>| at.map_or(false, |at| since < at && at <= now);
        let mut cursor = engine.provider().query_open_alarms(Some(&self.name)).await?;
        while cursor.next().await? {
            let Some(record) = cursor.current() else { continue };
            if !record.awaiting_ack() {
                continue;
            }
            if tier1 && due(settings.tier1_at(record.created_time)) {
                debug!("Escalating {} to tier 1", record.id);
                self.escalation1.notify(record);
            }
            if tier2 && due(settings.tier2_at(record.created_time)) {
                debug!("Escalating {} to tier 2", record.id);
                self.escalation2.notify(record);
            }
        }
        cursor.close().await;
        Ok(())
    }

    /// Delete records past their retention, at most once an hour.
    ///
    /// The first call only starts the hourly schedule.
    pub async fn check_auto_purge(&self, engine: &Engine) {
        let now = engine.now();
        {
            let mut last = self.last_purge.lock();
            match *last {
                Some(at) if now - at < Duration::minutes(PURGE_INTERVAL_MINUTES) => return,
                None => {
                    *last = Some(now);
                    return;
                }
                Some(_) => *last = Some(now),
            }
        }
        self.purge(engine, now).await;
    }

    /// Delete closed and open records older than their retention now
    pub async fn purge(&self, engine: &Engine, now: DateTime<Utc>) -> usize {
        let settings = self.settings();
        let mut deleted = 0;
        for (days, filter) in [
            (settings.purge_closed_days, OpenFilter::Closed),
            (settings.purge_open_days, OpenFilter::Open),
        ] {
            if days == 0 {
                continue;
            }
            let cutoff = now - Duration::days(days as i64);
            match self.purge_older_than(engine, cutoff, filter).await {
                Ok(count) => deleted += count,
                Err(e) => error!("Auto purge of {} failed: {}", self.name, e),
            }
        }
        if deleted > 0 {
            info!("Purged {} records from {}", deleted, self.name);
            engine.mark_counts_dirty();
        }
        deleted
    }

    async fn purge_older_than(&self, engine: &Engine, cutoff: DateTime<Utc>, open: OpenFilter) -> Result<usize> {
        let query = AlarmQuery {
            open,
            ..AlarmQuery::all().for_class(self.name.clone()).between(None, Some(cutoff))
        };
        let mut ids: Vec<Uuid> = Vec::new();
        let mut cursor = engine.provider().query_alarms(&query).await?;
        while cursor.next().await? {
            if let Some(record) = cursor.current() {
                ids.push(record.id);
            }
        }
        cursor.close().await;

        let mut deleted = 0;
        for (i, id) in ids.into_iter().enumerate() {
            match engine.provider().delete_record(id).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("Purging {} failed: {}", id, e),
            }
            if (i + 1) % PURGE_YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(deleted)
    }
}
